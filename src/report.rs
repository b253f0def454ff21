use std::fmt::Write;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{Incident, IncidentStatus, SchoolSettings, Severity, Student, User};

pub const SINGLE_TITLE: &str = "RAPPORT D'INCIDENT DISCIPLINAIRE";
pub const SUMMARY_TITLE: &str = "RAPPORT DE SYNTHÈSE DES INCIDENTS DISCIPLINAIRES";

/// Lines rendered in bold by the paginated layout.
pub const SECTION_HEADERS: &[&str] = &[
    "RAPPORT D'INCIDENT",
    "RAPPORT DE SYNTHÈSE",
    "INFORMATIONS GÉNÉRALES",
    "ÉLÈVE(S) CONCERNÉ(S)",
    "DESCRIPTION DE L'INCIDENT",
    "TÉMOINS",
    "NOTES DÉTAILLÉES",
    "PIÈCES JOINTES",
    "SANCTIONS APPLIQUÉES",
    "PÉRIODE D'ANALYSE",
    "STATISTIQUES GÉNÉRALES",
    "RÉPARTITION PAR STATUT",
    "RÉPARTITION PAR GRAVITÉ",
    "LISTE DES INCIDENTS",
];

const TITLE_LABEL: &str = "Titre de l'incident : ";
const DATE_LABEL: &str = "Date : ";
const STUDENT_LABEL: &str = "Nom et prénom : ";
const UNKNOWN: &str = "Inconnu";
const GENERAL_HEADER: &str = "INFORMATIONS GÉNÉRALES";
const STUDENTS_HEADER: &str = "ÉLÈVE(S) CONCERNÉ(S)";
const DESCRIPTION_HEADER: &str = "DESCRIPTION DE L'INCIDENT";
pub const NO_INCIDENTS: &str = "Aucun incident";

/// Resolves ids stored on incidents to people.
#[derive(Debug, Clone, Copy)]
pub struct Directory<'a> {
    pub students: &'a [Student],
    pub users: &'a [User],
}

impl<'a> Directory<'a> {
    pub fn new(students: &'a [Student], users: &'a [User]) -> Self {
        Self { students, users }
    }

    pub fn student(&self, id: Uuid) -> Option<&'a Student> {
        self.students.iter().find(|student| student.id == id)
    }

    pub fn student_names(&self, ids: &[Uuid]) -> String {
        ids.iter()
            .map(|id| {
                self.student(*id)
                    .map(Student::full_name)
                    .unwrap_or_else(|| UNKNOWN.to_string())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn user_name(&self, id: Uuid) -> String {
        self.users
            .iter()
            .find(|user| user.id == id)
            .map(User::full_name)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%d/%m/%Y").ok()
}

/// Inclusive bounds; a missing side does not filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryStats {
    pub total: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

pub fn summary_stats(incidents: &[&Incident]) -> SummaryStats {
    let mut stats = SummaryStats {
        total: incidents.len(),
        ..SummaryStats::default()
    };

    for incident in incidents {
        match incident.status {
            IncidentStatus::InProgress => stats.in_progress += 1,
            IncidentStatus::Resolved => stats.resolved += 1,
        }
        match incident.severity {
            Severity::High => stats.high += 1,
            Severity::Medium => stats.medium += 1,
            Severity::Low => stats.low += 1,
        }
    }

    stats
}

pub fn filter_by_range(incidents: &[Incident], range: DateRange) -> Vec<&Incident> {
    incidents
        .iter()
        .filter(|incident| range.contains(incident.date))
        .collect()
}

fn write_header(output: &mut String, title: &str, settings: &SchoolSettings) {
    let _ = writeln!(output, "{title}");
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", settings.school_name);
    if !settings.address.is_empty() {
        let _ = writeln!(output, "{}", settings.address);
    }
    let _ = writeln!(output);
}

fn write_signature(output: &mut String, settings: &SchoolSettings, issued_on: NaiveDate) {
    let _ = writeln!(output);
    let _ = writeln!(output, "Fait le {}", format_date(issued_on));
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", settings.principal_name);
    let _ = writeln!(output, "{}", settings.principal_title);
}

fn write_section(output: &mut String, header: &str) {
    let _ = writeln!(output);
    let _ = writeln!(output, "{header}");
    let _ = writeln!(output);
}

pub fn build_single_report(
    incident: &Incident,
    directory: &Directory<'_>,
    settings: &SchoolSettings,
    issued_on: NaiveDate,
) -> String {
    let mut output = String::new();
    write_header(&mut output, SINGLE_TITLE, settings);

    write_section(&mut output, GENERAL_HEADER);
    let _ = writeln!(output, "{TITLE_LABEL}{}", incident.title);
    let _ = writeln!(output, "{DATE_LABEL}{}", format_date(incident.date));
    let _ = writeln!(output, "Lieu : {}", incident.location);
    let _ = writeln!(output, "Gravité : {}", incident.severity.label());
    let _ = writeln!(output, "Statut : {}", incident.status.label());
    let _ = writeln!(output, "Créé par : {}", directory.user_name(incident.created_by));

    write_section(&mut output, STUDENTS_HEADER);
    let mut known = 0usize;
    for id in &incident.student_ids {
        let Some(student) = directory.student(*id) else {
            continue;
        };
        if known > 0 {
            let _ = writeln!(output);
        }
        known += 1;
        let _ = writeln!(output, "{STUDENT_LABEL}{}", student.full_name());
        let _ = writeln!(output, "Classe : {}", student.class);
        if let Some(level) = student.level.as_deref().filter(|v| !v.is_empty()) {
            let _ = writeln!(output, "Niveau : {level}");
        }
        if let Some(email) = student.email.as_deref().filter(|v| !v.is_empty()) {
            let _ = writeln!(output, "Email : {email}");
        }
        if let Some(contact) = student.parent_contact.as_deref().filter(|v| !v.is_empty()) {
            let _ = writeln!(output, "Contact parent : {contact}");
        }
    }
    if known == 0 {
        let _ = writeln!(output, "{UNKNOWN}");
    }

    write_section(&mut output, DESCRIPTION_HEADER);
    let _ = writeln!(output, "{}", incident.description);

    write_section(&mut output, "TÉMOINS");
    if incident.witnesses.is_empty() {
        let _ = writeln!(output, "Aucun témoin");
    } else {
        for witness in &incident.witnesses {
            let _ = writeln!(output, "- {witness}");
        }
    }

    write_section(&mut output, "NOTES DÉTAILLÉES");
    if incident.notes.trim().is_empty() {
        let _ = writeln!(output, "Aucune note");
    } else {
        let _ = writeln!(output, "{}", incident.notes);
    }

    write_section(&mut output, "PIÈCES JOINTES");
    if incident.attachments.is_empty() {
        let _ = writeln!(output, "Aucune pièce jointe");
    } else {
        for attachment in &incident.attachments {
            let _ = writeln!(output, "- {} ({})", attachment.name, attachment.mime_type);
        }
    }

    write_section(&mut output, "SANCTIONS APPLIQUÉES");
    if incident.sanctions.is_empty() {
        let _ = writeln!(output, "Aucune sanction");
    } else {
        for sanction in &incident.sanctions {
            let duration = match (sanction.duration, sanction.kind.duration_unit()) {
                (Some(length), Some(unit)) if length > 0 => {
                    format!(" ({length} {})", unit.label())
                }
                _ => String::new(),
            };
            let _ = writeln!(
                output,
                "- {}{} - {}",
                sanction.type_label(),
                duration,
                sanction.description
            );
        }
    }

    write_signature(&mut output, settings, issued_on);
    output
}

pub fn build_summary_report(
    incidents: &[Incident],
    range: DateRange,
    directory: &Directory<'_>,
    settings: &SchoolSettings,
    issued_on: NaiveDate,
) -> String {
    let selected = filter_by_range(incidents, range);
    let stats = summary_stats(&selected);

    let mut output = String::new();
    write_header(&mut output, SUMMARY_TITLE, settings);

    write_section(&mut output, "PÉRIODE D'ANALYSE");
    let _ = writeln!(
        output,
        "Du {} au {}",
        range.start.map_or_else(|| "début".to_string(), format_date),
        range.end.map_or_else(|| "fin".to_string(), format_date)
    );

    write_section(&mut output, "STATISTIQUES GÉNÉRALES");
    let _ = writeln!(output, "Total des incidents : {}", stats.total);

    write_section(&mut output, "RÉPARTITION PAR STATUT");
    let _ = writeln!(output, "En cours : {}", stats.in_progress);
    let _ = writeln!(output, "Résolus : {}", stats.resolved);

    write_section(&mut output, "RÉPARTITION PAR GRAVITÉ");
    let _ = writeln!(output, "Élevée : {}", stats.high);
    let _ = writeln!(output, "Moyenne : {}", stats.medium);
    let _ = writeln!(output, "Faible : {}", stats.low);

    write_section(&mut output, "LISTE DES INCIDENTS");
    if selected.is_empty() {
        let _ = writeln!(output, "{NO_INCIDENTS}");
    } else {
        for incident in &selected {
            let _ = writeln!(
                output,
                "- {} - {} ({}) - Créé par {}",
                incident.title,
                directory.student_names(&incident.student_ids),
                format_date(incident.date),
                directory.user_name(incident.created_by)
            );
        }
    }

    write_signature(&mut output, settings, issued_on);
    output
}

pub fn single_file_stem(incident_id: Uuid, today: NaiveDate) -> String {
    format!("rapport_incident_{}_{}", incident_id, today.format("%Y-%m-%d"))
}

pub fn summary_file_stem(today: NaiveDate) -> String {
    format!("rapport_synthese_{}", today.format("%Y-%m-%d"))
}

pub fn single_subject(incident: &Incident) -> String {
    format!("Rapport d'incident - {}", incident.title)
}

pub const SUMMARY_SUBJECT: &str = "Rapport de synthèse des incidents";

pub const INVITATION_SUBJECT: &str = "Invitation - Application de gestion disciplinaire";

/// Invitation mail body addressed to `user`, signed by `inviter`.
pub fn build_invitation(user: &User, inviter: &User) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Bonjour {},", user.full_name());
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Vous avez été invité(e) à rejoindre l'application de gestion disciplinaire de notre établissement."
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "Votre fonction : {}", user.function_label());
    let _ = writeln!(output, "Email de connexion : {}", user.email);
    let _ = writeln!(output);
    let _ = writeln!(output, "Cordialement,");
    let _ = write!(output, "{}", inviter.full_name());
    output
}

/// Fields recovered from a rendered single-incident report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSingleReport {
    pub title: String,
    pub date: NaiveDate,
    pub student_names: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ReportSection {
    Banner,
    General,
    Students,
    Body,
}

/// Only reads the fixed sections, so labels quoted in free text are ignored.
pub fn parse_single_report(text: &str) -> Option<ParsedSingleReport> {
    let mut section = ReportSection::Banner;
    let mut title = None;
    let mut date = None;
    let mut student_names = Vec::new();

    for line in text.lines() {
        // Sections only move forward.
        let next = match line {
            GENERAL_HEADER => ReportSection::General,
            STUDENTS_HEADER => ReportSection::Students,
            DESCRIPTION_HEADER => ReportSection::Body,
            _ => section,
        };
        if next > section {
            section = next;
            continue;
        }

        match section {
            ReportSection::General => {
                if let Some(value) = line.strip_prefix(TITLE_LABEL) {
                    title.get_or_insert_with(|| value.to_string());
                } else if let Some(value) = line.strip_prefix(DATE_LABEL) {
                    if date.is_none() {
                        date = parse_date(value);
                    }
                }
            }
            ReportSection::Students => {
                if let Some(value) = line.strip_prefix(STUDENT_LABEL) {
                    student_names.push(value.to_string());
                }
            }
            ReportSection::Banner | ReportSection::Body => {}
        }
    }

    Some(ParsedSingleReport {
        title: title?,
        date: date?,
        student_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, Sanction, SanctionKind};
    use crate::priority::fixtures::incident;
    use chrono::Utc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn student(first: &str, last: &str) -> Student {
        Student {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            class: "4ème B".to_string(),
            level: Some("4ème".to_string()),
            email: None,
            birth_date: None,
            parent_contact: Some("06 12 34 56 78".to_string()),
        }
    }

    fn settings() -> SchoolSettings {
        SchoolSettings {
            school_name: "Collège Jean Jaurès".to_string(),
            principal_name: "Mme Durand".to_string(),
            principal_title: "Principale".to_string(),
            address: "12 rue des Écoles, 31000 Toulouse".to_string(),
            ..SchoolSettings::default()
        }
    }

    #[test]
    fn empty_summary_renders_zero_statistics() {
        let report = build_summary_report(
            &[],
            DateRange::default(),
            &Directory::new(&[], &[]),
            &settings(),
            day(2026, 3, 20),
        );

        assert!(report.contains("Total des incidents : 0"));
        assert!(report.contains("En cours : 0"));
        assert!(report.contains("Résolus : 0"));
        assert!(report.contains("Élevée : 0"));
        assert!(report.contains("Moyenne : 0"));
        assert!(report.contains("Faible : 0"));
        let list = report
            .split("LISTE DES INCIDENTS")
            .nth(1)
            .expect("list section present");
        assert!(list.contains(NO_INCIDENTS));
        assert!(report.contains("Du début au fin"));
    }

    #[test]
    fn summary_range_is_inclusive_and_one_sided() {
        let incidents = vec![
            incident("a", Severity::High, IncidentStatus::InProgress, day(2026, 3, 1)),
            incident("b", Severity::Low, IncidentStatus::Resolved, day(2026, 3, 10)),
            incident("c", Severity::Medium, IncidentStatus::InProgress, day(2026, 3, 20)),
        ];

        let both = filter_by_range(
            &incidents,
            DateRange::new(Some(day(2026, 3, 1)), Some(day(2026, 3, 10))),
        );
        assert_eq!(both.len(), 2);

        let start_only = filter_by_range(&incidents, DateRange::new(Some(day(2026, 3, 10)), None));
        assert_eq!(start_only.len(), 2);

        let end_only = filter_by_range(&incidents, DateRange::new(None, Some(day(2026, 3, 9))));
        assert_eq!(end_only.len(), 1);

        let stats = summary_stats(&both);
        assert_eq!(
            stats,
            SummaryStats {
                total: 2,
                in_progress: 1,
                resolved: 1,
                high: 1,
                medium: 0,
                low: 1,
            }
        );
    }

    #[test]
    fn summary_lists_incidents_with_people() {
        let pupil = student("Lucas", "Bernard");
        let mut item = incident("Insulte", Severity::Medium, IncidentStatus::InProgress, day(2026, 2, 3));
        item.student_ids = vec![pupil.id, Uuid::new_v4()];
        let report = build_summary_report(
            &[item],
            DateRange::default(),
            &Directory::new(std::slice::from_ref(&pupil), &[]),
            &settings(),
            day(2026, 3, 20),
        );
        assert!(report.contains("- Insulte - Lucas Bernard, Inconnu (03/02/2026) - Créé par Inconnu"));
        assert!(!report.contains(NO_INCIDENTS));
    }

    #[test]
    fn single_report_round_trips_through_labels() {
        let first = student("Emma", "Petit");
        let second = student("Noah", "Roux");
        let mut item = incident(
            "Bagarre au réfectoire",
            Severity::High,
            IncidentStatus::InProgress,
            day(2026, 1, 15),
        );
        item.student_ids = vec![first.id, second.id];
        let students = vec![first, second];

        let text = build_single_report(
            &item,
            &Directory::new(&students, &[]),
            &settings(),
            day(2026, 1, 16),
        );
        let parsed = parse_single_report(&text).expect("labels present");

        assert_eq!(parsed.title, "Bagarre au réfectoire");
        assert_eq!(parsed.date, day(2026, 1, 15));
        assert_eq!(parsed.student_names, vec!["Emma Petit", "Noah Roux"]);
    }

    #[test]
    fn labels_quoted_in_free_text_are_not_parsed() {
        let emma = student("Emma", "Petit");
        let mut item = incident("Insolence", Severity::Medium, IncidentStatus::InProgress, day(2026, 2, 3));
        item.student_ids = vec![emma.id];
        item.description = "Titre de l'incident : autre chose\nDate : 01/01/2020".to_string();
        item.notes = "Témoignage recueilli.\nNom et prénom : Jean Témoin".to_string();
        item.witnesses = vec!["Nom et prénom : Mme Blanc".to_string()];
        let students = vec![emma];

        let text = build_single_report(
            &item,
            &Directory::new(&students, &[]),
            &settings(),
            day(2026, 2, 4),
        );
        let parsed = parse_single_report(&text).expect("labels present");

        assert_eq!(parsed.title, "Insolence");
        assert_eq!(parsed.date, day(2026, 2, 3));
        assert_eq!(parsed.student_names, vec!["Emma Petit"]);
    }

    #[test]
    fn single_report_lists_evidence_and_sanctions() {
        let mut item = incident("Vol", Severity::High, IncidentStatus::Resolved, day(2026, 1, 5));
        item.witnesses = vec!["M. Leroy".to_string()];
        item.attachments.push(Attachment {
            id: Uuid::new_v4(),
            name: "photo.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size: 2048,
            data: String::new(),
            uploaded_at: Utc::now(),
        });
        item.sanctions.push(Sanction {
            id: Uuid::new_v4(),
            kind: SanctionKind::Detention,
            custom_label: None,
            description: "Mercredi après-midi".to_string(),
            date: day(2026, 1, 7),
            duration: Some(2),
            applied: true,
            applied_by: None,
        });
        item.sanctions.push(Sanction {
            id: Uuid::new_v4(),
            kind: SanctionKind::TemporaryExclusion,
            custom_label: None,
            description: "Exclusion".to_string(),
            date: day(2026, 1, 8),
            duration: Some(3),
            applied: false,
            applied_by: None,
        });

        let text = build_single_report(&item, &Directory::new(&[], &[]), &settings(), day(2026, 1, 9));
        assert!(text.contains("- M. Leroy"));
        assert!(text.contains("- photo.jpg (image/jpeg)"));
        assert!(text.contains("- Retenue (2 heures) - Mercredi après-midi"));
        assert!(text.contains("- Exclusion temporaire (3 jours) - Exclusion"));
        assert!(text.contains("Statut : Résolu"));
        assert!(text.contains("Aucune note"));
        assert!(text.contains("Fait le 09/01/2026"));
        assert!(text.contains("Mme Durand\nPrincipale"));
    }

    #[test]
    fn parse_rejects_text_without_labels() {
        assert!(parse_single_report("bonjour").is_none());
    }

    #[test]
    fn invitation_names_function_and_signer() {
        use crate::models::Role;
        use crate::permissions::PermissionOverrides;

        let person = |first: &str, last: &str, role: Role, custom: Option<&str>| User {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: format!("{}@college-jaures.fr", first.to_lowercase()),
            role,
            custom_role: custom.map(str::to_string),
            overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
            last_login: None,
        };
        let invitee = person("Paul", "Girard", Role::Other, Some("Infirmier"));
        let inviter = person("Hélène", "Marchand", Role::Principal, None);

        let body = build_invitation(&invitee, &inviter);
        assert!(body.starts_with("Bonjour Paul Girard,"));
        assert!(body.contains("Votre fonction : Infirmier"));
        assert!(body.contains("Email de connexion : paul@college-jaures.fr"));
        assert!(body.ends_with("Cordialement,\nHélène Marchand"));
    }
}
