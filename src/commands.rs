use chrono::{Local, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::attachment;
use crate::auth::{AuthGateway, SessionStore};
use crate::db::{self, IncidentPatch, UserPatch};
use crate::export;
use crate::filters::{self, IncidentFilter};
use crate::incident::{self, IncidentDraft, SanctionDraft};
use crate::models::{
    Incident, IncidentStatus, NewStudent, NewUser, ReportKind, SavedReport, User,
};
use crate::permissions::{self, Permission, PermissionOverrides};
use crate::priority;
use crate::report::{self, DateRange, Directory};
use crate::roster;
use crate::{
    ExportArgs, ExportFormat, IncidentCommand, OverrideArgs, ReportCommand, SavedReportCommand,
    SettingsCommand, StudentCommand, UserCommand,
};

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn signed_in<G: AuthGateway>(
    sessions: &SessionStore<G>,
    permission: Permission,
) -> anyhow::Result<User> {
    let user = sessions.current_user()?;
    permissions::require(&user, permission)?;
    Ok(user)
}

fn apply_overrides(overrides: &mut PermissionOverrides, args: &OverrideArgs) {
    for permission in &args.reset {
        overrides.set(*permission, None);
    }
    for permission in &args.allow {
        overrides.set(*permission, Some(true));
    }
    for permission in &args.deny {
        overrides.set(*permission, Some(false));
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

pub fn whoami<G: AuthGateway>(sessions: &SessionStore<G>) -> anyhow::Result<()> {
    let user = sessions.current_user()?;
    let set = user.permissions();
    println!("{} <{}>", user.full_name(), user.email);
    println!("Function: {}", user.function_label());
    println!(
        "Permissions: view={} create={} sanction={} settings={} admin={}",
        yes_no(set.view),
        yes_no(set.create),
        yes_no(set.sanction),
        yes_no(set.access_settings),
        yes_no(set.admin)
    );
    Ok(())
}

pub async fn student<G: AuthGateway>(
    pool: &PgPool,
    sessions: &SessionStore<G>,
    command: StudentCommand,
) -> anyhow::Result<()> {
    match command {
        StudentCommand::Add {
            first_name,
            last_name,
            class,
            level,
            email,
            birth_date,
            parent_contact,
        } => {
            signed_in(sessions, Permission::Create)?;
            let created = db::create_student(
                pool,
                &NewStudent {
                    first_name,
                    last_name,
                    class,
                    level,
                    email,
                    birth_date,
                    parent_contact,
                },
            )
            .await?;
            println!("Added {} ({}) as {}.", created.full_name(), created.class, created.id);
        }
        StudentCommand::List { class } => {
            signed_in(sessions, Permission::View)?;
            let students = db::list_students(pool).await?;
            let shown: Vec<_> = students
                .iter()
                .filter(|student| class.as_deref().map_or(true, |c| student.class == c))
                .collect();
            if shown.is_empty() {
                println!("No students found.");
                return Ok(());
            }
            for student in shown {
                println!("- {} ({}) {}", student.full_name(), student.class, student.id);
            }
        }
        StudentCommand::Update {
            id,
            first_name,
            last_name,
            class,
            level,
            email,
            birth_date,
            parent_contact,
        } => {
            signed_in(sessions, Permission::Create)?;
            let mut student = db::list_students(pool)
                .await?
                .into_iter()
                .find(|student| student.id == id)
                .ok_or_else(|| anyhow::anyhow!("no student with id {id}"))?;
            if let Some(first_name) = first_name {
                student.first_name = first_name;
            }
            if let Some(last_name) = last_name {
                student.last_name = last_name;
            }
            if let Some(class) = class {
                student.class = class;
            }
            if level.is_some() {
                student.level = level;
            }
            if email.is_some() {
                student.email = email;
            }
            if birth_date.is_some() {
                student.birth_date = birth_date;
            }
            if parent_contact.is_some() {
                student.parent_contact = parent_contact;
            }
            let updated = db::update_student(pool, &student).await?;
            println!("Updated {} ({}).", updated.full_name(), updated.class);
        }
        StudentCommand::Import { file } => {
            signed_in(sessions, Permission::Create)?;
            let students = roster::load_roster(&file)?;
            if students.is_empty() {
                println!("No valid students found in {}.", file.display());
                return Ok(());
            }
            let imported = db::create_students(pool, &students).await?;
            println!("Imported {imported} students.");
        }
        StudentCommand::Delete { id } => {
            signed_in(sessions, Permission::Admin)?;
            db::delete_student(pool, id).await?;
            println!("Student deleted.");
        }
    }
    Ok(())
}

pub async fn user<G: AuthGateway>(
    pool: &PgPool,
    sessions: &SessionStore<G>,
    command: UserCommand,
) -> anyhow::Result<()> {
    let actor = signed_in(sessions, Permission::Admin)?;
    match command {
        UserCommand::Add {
            email,
            first_name,
            last_name,
            role,
            custom_role,
            overrides,
        } => {
            let mut profile = NewUser {
                first_name,
                last_name,
                email,
                role,
                custom_role,
                overrides: PermissionOverrides::default(),
            };
            apply_overrides(&mut profile.overrides, &overrides);
            let created = db::create_user(pool, Uuid::new_v4(), &profile).await?;
            println!("Added {} ({}) as {}.", created.full_name(), created.function_label(), created.id);
        }
        UserCommand::List => {
            let users = db::list_users(pool).await?;
            if users.is_empty() {
                println!("No users found.");
                return Ok(());
            }
            for user in &users {
                let custom = if user.overrides.is_empty() {
                    ""
                } else {
                    " [custom permissions]"
                };
                let last_login = user
                    .last_login
                    .map(|at| at.format("%d/%m/%Y %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "- {} <{}> {}{} last login {} {}",
                    user.full_name(),
                    user.email,
                    user.function_label(),
                    custom,
                    last_login,
                    user.id
                );
            }
        }
        UserCommand::Update {
            id,
            email,
            first_name,
            last_name,
            role,
            custom_role,
            overrides,
        } => {
            let existing = db::get_user(pool, id).await?;
            let mut merged = existing.overrides;
            apply_overrides(&mut merged, &overrides);
            let patch = UserPatch {
                first_name,
                last_name,
                email,
                role,
                custom_role,
                overrides: (merged != existing.overrides).then_some(merged),
            };
            let updated = db::update_user(pool, id, &patch).await?;
            println!("Updated {} ({}).", updated.full_name(), updated.function_label());
        }
        UserCommand::Delete { id } => {
            if id == actor.id {
                anyhow::bail!("you cannot delete your own profile");
            }
            db::delete_user(pool, id).await?;
            println!("User deleted.");
        }
        UserCommand::Invite { id } => {
            let invitee = db::get_user(pool, id).await?;
            let body = report::build_invitation(&invitee, &actor);
            println!(
                "{}",
                export::mailto_link(Some(&invitee.email), report::INVITATION_SUBJECT, &body)
            );
        }
    }
    Ok(())
}

fn print_incident(incident: &Incident, directory: &Directory<'_>, today: NaiveDate) {
    println!("{} [{}]", incident.title, incident.id);
    println!("Date: {}", report::format_date(incident.date));
    println!("Location: {}", incident.location);
    println!("Severity: {}", incident.severity.label());
    match incident.status {
        IncidentStatus::InProgress => println!(
            "Status: {} (open for {} days)",
            incident.status.label(),
            priority::days_open(incident.date, today)
        ),
        IncidentStatus::Resolved => println!("Status: {}", incident.status.label()),
    }
    println!("Students: {}", directory.student_names(&incident.student_ids));
    println!("Created by: {}", directory.user_name(incident.created_by));
    println!("Last modified by: {}", directory.user_name(incident.last_modified_by));
    println!();
    println!("{}", incident.description);
    if !incident.witnesses.is_empty() {
        println!();
        println!("Witnesses: {}", incident.witnesses.join(", "));
    }
    if !incident.notes.is_empty() {
        println!();
        println!("Notes: {}", incident.notes);
    }
    if incident.handwritten_notes.is_some() {
        println!("Handwritten note attached.");
    }
    if !incident.attachments.is_empty() {
        println!();
        println!("Attachments:");
        for attachment in &incident.attachments {
            println!("- {} ({}, {} bytes)", attachment.name, attachment.mime_type, attachment.size);
        }
    }
    if !incident.sanctions.is_empty() {
        println!();
        println!("Sanctions:");
        for sanction in &incident.sanctions {
            let duration = match (sanction.duration, sanction.kind.duration_unit()) {
                (Some(length), Some(unit)) => format!(" {length} {}", unit.label()),
                _ => String::new(),
            };
            let state = if sanction.applied { "applied" } else { "pending" };
            println!(
                "- {}{} on {}: {} ({state})",
                sanction.type_label(),
                duration,
                report::format_date(sanction.date),
                sanction.description
            );
        }
    }
}

pub async fn incident<G: AuthGateway>(
    pool: &PgPool,
    sessions: &SessionStore<G>,
    command: IncidentCommand,
) -> anyhow::Result<()> {
    match command {
        IncidentCommand::Add {
            title,
            description,
            students,
            date,
            severity,
            location,
            witnesses,
            notes,
            handwritten,
            attachments,
        } => {
            let actor = signed_in(sessions, Permission::Create)?;
            let (accepted, rejected) = attachment::ingest_batch(&attachments);
            for err in &rejected {
                println!("Skipped attachment: {err}");
            }

            let mut draft = IncidentDraft::new(date.unwrap_or_else(today));
            draft.title = title;
            draft.description = description;
            draft.severity = severity;
            draft.location = location;
            draft.witnesses = witnesses;
            draft.notes = notes;
            draft.attachments = accepted;
            for id in students {
                if !draft.student_ids.contains(&id) {
                    draft.toggle_student(id);
                }
            }
            if let Some(path) = handwritten {
                draft.handwritten_notes = Some(attachment::load_data_url(&path)?);
            }

            let incident = draft.validate()?.into_incident(actor.id);
            let created = db::create_incident(pool, &incident).await?;
            println!("Recorded incident {}.", created.id);
        }
        IncidentCommand::List {
            search,
            status,
            severity,
            class,
            from,
            to,
        } => {
            signed_in(sessions, Permission::View)?;
            let incidents = db::list_incidents(pool).await?;
            let students = db::list_students(pool).await?;
            let users = db::list_users(pool).await?;
            let directory = Directory::new(&students, &users);

            if let Some(class) = class.as_deref() {
                let known = filters::available_classes(&directory);
                if !known.iter().any(|existing| existing == class) {
                    warn!(class, "no student belongs to this class");
                }
            }
            let filter = IncidentFilter {
                search,
                status,
                severity,
                class,
                date_start: from,
                date_end: to,
            };
            let shown = filter.apply(&incidents, &directory);
            if shown.is_empty() {
                println!("No incidents match these filters.");
                return Ok(());
            }
            for incident in shown {
                println!(
                    "- {} [{}] {} {} - {} ({})",
                    incident.title,
                    incident.severity.label(),
                    incident.status.label(),
                    report::format_date(incident.date),
                    directory.student_names(&incident.student_ids),
                    incident.id
                );
            }
        }
        IncidentCommand::Show { id } => {
            signed_in(sessions, Permission::View)?;
            let incident = db::get_incident(pool, id).await?;
            let students = db::list_students(pool).await?;
            let users = db::list_users(pool).await?;
            print_incident(&incident, &Directory::new(&students, &users), today());
        }
        IncidentCommand::Update {
            id,
            title,
            description,
            students,
            date,
            severity,
            status,
            location,
            witnesses,
            notes,
            handwritten,
        } => {
            let actor = signed_in(sessions, Permission::Create)?;
            let handwritten_notes = match handwritten {
                Some(path) => Some(attachment::load_data_url(&path)?),
                None => None,
            };
            let witnesses: Vec<String> = witnesses
                .into_iter()
                .map(|witness| witness.trim().to_string())
                .filter(|witness| !witness.is_empty())
                .collect();
            let patch = IncidentPatch {
                title,
                description,
                student_ids: (!students.is_empty()).then_some(students),
                date,
                severity,
                status,
                location,
                witnesses: non_empty(witnesses),
                notes,
                handwritten_notes,
                ..IncidentPatch::default()
            };
            let updated = db::update_incident(pool, id, &patch, actor.id).await?;
            println!("Updated incident {}.", updated.id);
        }
        IncidentCommand::Resolve { id } => {
            let actor = signed_in(sessions, Permission::Create)?;
            let patch = IncidentPatch {
                status: Some(IncidentStatus::Resolved),
                ..IncidentPatch::default()
            };
            db::update_incident(pool, id, &patch, actor.id).await?;
            println!("Incident resolved.");
        }
        IncidentCommand::Delete { id } => {
            signed_in(sessions, Permission::Admin)?;
            db::delete_incident(pool, id).await?;
            println!("Incident deleted.");
        }
        IncidentCommand::Attach { id, files } => {
            let actor = signed_in(sessions, Permission::Create)?;
            let mut incident = db::get_incident(pool, id).await?;
            let (accepted, rejected) = attachment::ingest_batch(&files);
            for err in &rejected {
                println!("Skipped attachment: {err}");
            }
            if accepted.is_empty() {
                println!("No attachment added.");
                return Ok(());
            }
            let added = accepted.len();
            incident.attachments.extend(accepted);
            let patch = IncidentPatch {
                attachments: Some(incident.attachments),
                ..IncidentPatch::default()
            };
            db::update_incident(pool, id, &patch, actor.id).await?;
            println!("Attached {added} files.");
        }
        IncidentCommand::Sanction {
            id,
            kind,
            description,
            custom_label,
            date,
            duration,
            applied,
        } => {
            let actor = sessions.current_user()?;
            let mut incident = db::get_incident(pool, id).await?;
            let draft = SanctionDraft {
                kind,
                custom_label,
                description,
                date: date.unwrap_or_else(today),
                duration,
                applied,
            };
            incident::add_sanction(&mut incident, draft, &actor)?;
            let patch = IncidentPatch {
                sanctions: Some(incident.sanctions),
                ..IncidentPatch::default()
            };
            db::update_incident(pool, id, &patch, actor.id).await?;
            info!(incident_id = %id, kind = kind.as_str(), "sanction added");
            println!("Sanction added.");
        }
        IncidentCommand::Dictate { id, text } => {
            let actor = signed_in(sessions, Permission::Create)?;
            let incident = db::get_incident(pool, id).await?;
            let mut draft = IncidentDraft::from_incident(&incident);
            draft.append_transcript(text.trim());
            let patch = IncidentPatch {
                notes: Some(draft.notes),
                ..IncidentPatch::default()
            };
            db::update_incident(pool, id, &patch, actor.id).await?;
            println!("Notes updated.");
        }
    }
    Ok(())
}

pub async fn dashboard<G: AuthGateway>(
    pool: &PgPool,
    sessions: &SessionStore<G>,
) -> anyhow::Result<()> {
    signed_in(sessions, Permission::View)?;
    let incidents = db::list_incidents(pool).await?;
    let students = db::list_students(pool).await?;
    let users = db::list_users(pool).await?;
    let directory = Directory::new(&students, &users);
    let stats = filters::dashboard_stats(&incidents, &directory);

    println!(
        "Incidents: {} total, {} in progress, {} resolved, {} high severity",
        stats.total, stats.in_progress, stats.resolved, stats.high_severity
    );
    if !stats.by_class.is_empty() {
        println!();
        println!("By class:");
        for (class, count) in &stats.by_class {
            println!("- {class}: {count}");
        }
    }

    let queue = priority::dashboard_queue(&incidents);
    println!();
    if queue.is_empty() {
        println!("No incident in progress.");
    } else {
        println!("Priority incidents:");
        let today = today();
        for incident in queue {
            println!(
                "- [{}] {} - {} (open for {} days) {}",
                incident.severity.label(),
                incident.title,
                directory.student_names(&incident.student_ids),
                priority::days_open(incident.date, today),
                incident.id
            );
        }
    }

    if !stats.recent.is_empty() {
        println!();
        println!("Recent incidents:");
        for incident in &stats.recent {
            println!(
                "- {} ({}) {}",
                incident.title,
                report::format_date(incident.date),
                incident.status.label()
            );
        }
    }
    Ok(())
}

/// Hands finished report text to the selected sink.
fn export_report(
    content: &str,
    stem: &str,
    subject: &str,
    logo: Option<&str>,
    args: &ExportArgs,
) -> anyhow::Result<()> {
    match args.format {
        ExportFormat::Txt => {
            let path = export::write_text(&args.out, stem, content)?;
            println!("Report written to {}.", path.display());
        }
        ExportFormat::Pdf => {
            let layout = export::layout_pdf(content, logo);
            let path = export::write_pdf_layout(&args.out, stem, &layout)?;
            println!(
                "Layout for {} pages written to {}.",
                layout.pages.len(),
                path.display()
            );
        }
        ExportFormat::Email => {
            println!("{}", export::mailto_link(None, subject, content));
        }
    }
    Ok(())
}

async fn save_report(
    pool: &PgPool,
    actor: &User,
    title: String,
    kind: ReportKind,
    content: String,
    incident_ids: Vec<Uuid>,
) -> anyhow::Result<()> {
    let saved = db::create_report(
        pool,
        &SavedReport {
            id: Uuid::new_v4(),
            title,
            kind,
            content,
            created_at: Utc::now(),
            created_by: actor.id,
            incident_ids,
        },
    )
    .await?;
    println!("Report saved as {}.", saved.id);
    Ok(())
}

pub async fn report<G: AuthGateway>(
    pool: &PgPool,
    sessions: &SessionStore<G>,
    command: ReportCommand,
) -> anyhow::Result<()> {
    let actor = signed_in(sessions, Permission::View)?;
    let students = db::list_students(pool).await?;
    let users = db::list_users(pool).await?;
    let settings = db::get_settings(pool).await?;
    let directory = Directory::new(&students, &users);
    let issued_on = today();

    match command {
        ReportCommand::Single { incident, export } => {
            let incident = db::get_incident(pool, incident).await?;
            let content = report::build_single_report(&incident, &directory, &settings, issued_on);
            let subject = report::single_subject(&incident);
            export_report(
                &content,
                &report::single_file_stem(incident.id, issued_on),
                &subject,
                settings.school_logo.as_deref(),
                &export,
            )?;
            if export.save {
                permissions::require(&actor, Permission::Create)?;
                save_report(pool, &actor, subject, ReportKind::Single, content, vec![incident.id])
                    .await?;
            }
        }
        ReportCommand::Summary { from, to, export } => {
            let incidents = db::list_incidents(pool).await?;
            let range = DateRange::new(from, to);
            let content =
                report::build_summary_report(&incidents, range, &directory, &settings, issued_on);
            export_report(
                &content,
                &report::summary_file_stem(issued_on),
                report::SUMMARY_SUBJECT,
                settings.school_logo.as_deref(),
                &export,
            )?;
            if export.save {
                permissions::require(&actor, Permission::Create)?;
                let ids = report::filter_by_range(&incidents, range)
                    .iter()
                    .map(|incident| incident.id)
                    .collect();
                save_report(
                    pool,
                    &actor,
                    report::SUMMARY_SUBJECT.to_string(),
                    ReportKind::Summary,
                    content,
                    ids,
                )
                .await?;
            }
        }
    }
    Ok(())
}

pub async fn saved_reports<G: AuthGateway>(
    pool: &PgPool,
    sessions: &SessionStore<G>,
    command: SavedReportCommand,
) -> anyhow::Result<()> {
    match command {
        SavedReportCommand::List => {
            signed_in(sessions, Permission::View)?;
            let reports = db::list_reports(pool).await?;
            if reports.is_empty() {
                println!("No saved reports.");
                return Ok(());
            }
            for saved in reports {
                println!(
                    "- {} ({}, {} incidents) {} {}",
                    saved.title,
                    saved.kind.as_str(),
                    saved.incident_ids.len(),
                    saved.created_at.format("%d/%m/%Y"),
                    saved.id
                );
            }
        }
        SavedReportCommand::Show { id } => {
            signed_in(sessions, Permission::View)?;
            let saved = db::list_reports(pool)
                .await?
                .into_iter()
                .find(|saved| saved.id == id)
                .ok_or_else(|| anyhow::anyhow!("no saved report with id {id}"))?;
            if let Some(parsed) = report::parse_single_report(&saved.content) {
                println!(
                    "{} ({}) - {}",
                    parsed.title,
                    report::format_date(parsed.date),
                    parsed.student_names.join(", ")
                );
                println!();
            }
            println!("{}", saved.content);
        }
        SavedReportCommand::Rename { id, title } => {
            signed_in(sessions, Permission::Create)?;
            let renamed = db::update_report(pool, id, Some(&title), None).await?;
            println!("Report renamed to {}.", renamed.title);
        }
        SavedReportCommand::Delete { id } => {
            signed_in(sessions, Permission::Create)?;
            db::delete_report(pool, id).await?;
            println!("Report deleted.");
        }
    }
    Ok(())
}

pub async fn settings<G: AuthGateway>(
    pool: &PgPool,
    sessions: &SessionStore<G>,
    command: SettingsCommand,
) -> anyhow::Result<()> {
    match command {
        SettingsCommand::Show => {
            signed_in(sessions, Permission::View)?;
            let settings = db::get_settings(pool).await?;
            println!("School: {}", settings.school_name);
            println!("Address: {}", settings.address);
            println!(
                "Principal: {} ({})",
                settings.principal_name, settings.principal_title
            );
            println!("Logo: {}", if settings.school_logo.is_some() { "set" } else { "none" });
            match settings.allowed_domains.as_deref() {
                Some(domains) if !domains.is_empty() => {
                    println!("Allowed sign-up domains: {}", domains.join(", "))
                }
                _ => println!("Allowed sign-up domains: any"),
            }
        }
        SettingsCommand::Set {
            school_name,
            logo,
            remove_logo,
            principal_name,
            principal_title,
            address,
            allowed_domains,
            clear_domains,
        } => {
            signed_in(sessions, Permission::AccessSettings)?;
            let mut settings = db::get_settings(pool).await?;
            if let Some(name) = school_name {
                settings.school_name = name;
            }
            if let Some(name) = principal_name {
                settings.principal_name = name;
            }
            if let Some(title) = principal_title {
                settings.principal_title = title;
            }
            if let Some(address) = address {
                settings.address = address;
            }
            if remove_logo {
                settings.school_logo = None;
            }
            if let Some(path) = logo {
                settings.school_logo = Some(attachment::load_data_url(&path)?);
            }
            if clear_domains {
                settings.allowed_domains = None;
            }
            if let Some(domains) = non_empty(allowed_domains) {
                settings.allowed_domains = Some(domains);
            }
            db::save_settings(pool, &settings).await?;
            println!("Settings saved.");
        }
    }
    Ok(())
}
