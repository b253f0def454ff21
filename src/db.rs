use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GatewayError, ValidationError};
use crate::models::{
    Attachment, Incident, IncidentStatus, NewStudent, NewUser, ReportKind, Role, Sanction,
    SavedReport, SchoolSettings, Severity, Student, User,
};
use crate::permissions::PermissionOverrides;

type GatewayResult<T> = Result<T, GatewayError>;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn parsed<T>(field: &'static str, raw: String) -> GatewayResult<T>
where
    T: std::str::FromStr<Err = ValidationError>,
{
    raw.parse()
        .map_err(|_| GatewayError::Corrupt { field, value: raw })
}

fn not_found(collection: &'static str, id: Uuid) -> GatewayError {
    GatewayError::NotFound { collection, id }
}

// Students

fn student_from_row(row: &PgRow) -> GatewayResult<Student> {
    Ok(Student {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        class: row.try_get("class")?,
        level: row.try_get("level")?,
        email: row.try_get("email")?,
        birth_date: row.try_get("birth_date")?,
        parent_contact: row.try_get("parent_contact")?,
    })
}

pub async fn list_students(pool: &PgPool) -> GatewayResult<Vec<Student>> {
    let rows = sqlx::query(
        "SELECT * FROM incident_tracker.students ORDER BY class, last_name, first_name",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(student_from_row).collect()
}

async fn insert_student<'e, E>(executor: E, student: &NewStudent) -> GatewayResult<Student>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO incident_tracker.students
        (id, first_name, last_name, class, level, email, birth_date, parent_contact)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&student.first_name)
    .bind(&student.last_name)
    .bind(&student.class)
    .bind(&student.level)
    .bind(&student.email)
    .bind(&student.birth_date)
    .bind(&student.parent_contact)
    .fetch_one(executor)
    .await?;
    student_from_row(&row)
}

pub async fn create_student(pool: &PgPool, student: &NewStudent) -> GatewayResult<Student> {
    let created = insert_student(pool, student).await?;
    debug!(student_id = %created.id, "student created");
    Ok(created)
}

/// Roster imports land all-or-nothing.
pub async fn create_students(pool: &PgPool, students: &[NewStudent]) -> GatewayResult<usize> {
    let mut tx = pool.begin().await?;
    for student in students {
        insert_student(&mut *tx, student).await?;
    }
    tx.commit().await?;
    info!(count = students.len(), "roster imported");
    Ok(students.len())
}

pub async fn update_student(pool: &PgPool, student: &Student) -> GatewayResult<Student> {
    let row = sqlx::query(
        r#"
        UPDATE incident_tracker.students
        SET first_name = $2, last_name = $3, class = $4, level = $5,
            email = $6, birth_date = $7, parent_contact = $8
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(student.id)
    .bind(&student.first_name)
    .bind(&student.last_name)
    .bind(&student.class)
    .bind(&student.level)
    .bind(&student.email)
    .bind(&student.birth_date)
    .bind(&student.parent_contact)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found("students", student.id))?;
    student_from_row(&row)
}

pub async fn delete_student(pool: &PgPool, id: Uuid) -> GatewayResult<()> {
    let result = sqlx::query("DELETE FROM incident_tracker.students WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found("students", id));
    }
    Ok(())
}

// Users

fn user_from_row(row: &PgRow) -> GatewayResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        role: parsed::<Role>("role", row.try_get("role")?)?,
        custom_role: row.try_get("custom_role")?,
        overrides: PermissionOverrides {
            view: row.try_get("can_view")?,
            create: row.try_get("can_create")?,
            sanction: row.try_get("can_sanction")?,
            access_settings: row.try_get("can_access_settings")?,
            admin: row.try_get("is_admin")?,
        },
        created_at: row.try_get("created_at")?,
        last_login: row.try_get("last_login")?,
    })
}

/// Partial update for a user profile. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub custom_role: Option<String>,
    pub overrides: Option<PermissionOverrides>,
}

pub async fn list_users(pool: &PgPool) -> GatewayResult<Vec<User>> {
    let rows = sqlx::query("SELECT * FROM incident_tracker.users ORDER BY last_name, first_name")
        .fetch_all(pool)
        .await?;
    rows.iter().map(user_from_row).collect()
}

pub async fn get_user(pool: &PgPool, id: Uuid) -> GatewayResult<User> {
    let row = sqlx::query("SELECT * FROM incident_tracker.users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found("users", id))?;
    user_from_row(&row)
}

pub async fn create_user(pool: &PgPool, id: Uuid, user: &NewUser) -> GatewayResult<User> {
    insert_user(pool, id, user).await
}

/// The custom role label is only kept for `other`.
pub(crate) async fn insert_user<'e, E>(executor: E, id: Uuid, user: &NewUser) -> GatewayResult<User>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let custom_role = match user.role {
        Role::Other => user.custom_role.clone(),
        _ => None,
    };
    let row = sqlx::query(
        r#"
        INSERT INTO incident_tracker.users
        (id, first_name, last_name, email, role, custom_role,
         can_view, can_create, can_sanction, can_access_settings, is_admin)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(user.role.as_str())
    .bind(custom_role)
    .bind(user.overrides.view)
    .bind(user.overrides.create)
    .bind(user.overrides.sanction)
    .bind(user.overrides.access_settings)
    .bind(user.overrides.admin)
    .fetch_one(executor)
    .await?;
    let created = user_from_row(&row)?;
    info!(user_id = %created.id, role = created.role.as_str(), "user created");
    Ok(created)
}

impl UserPatch {
    /// Merges the patch into `user`. Returns whether the login email changed.
    pub fn apply(&self, user: &mut User) -> bool {
        if let Some(first_name) = &self.first_name {
            user.first_name = first_name.clone();
        }
        if let Some(last_name) = &self.last_name {
            user.last_name = last_name.clone();
        }
        let email_changed = self.email.as_ref().is_some_and(|email| *email != user.email);
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if self.custom_role.is_some() {
            user.custom_role = self.custom_role.clone();
        }
        if user.role != Role::Other {
            user.custom_role = None;
        }
        if let Some(overrides) = self.overrides {
            user.overrides = overrides;
        }
        email_changed
    }
}

/// An email change is carried over to the login account in the same transaction.
pub async fn update_user(pool: &PgPool, id: Uuid, patch: &UserPatch) -> GatewayResult<User> {
    let mut user = get_user(pool, id).await?;
    let email_changed = patch.apply(&mut user);

    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        r#"
        UPDATE incident_tracker.users
        SET first_name = $2, last_name = $3, email = $4, role = $5, custom_role = $6,
            can_view = $7, can_create = $8, can_sanction = $9,
            can_access_settings = $10, is_admin = $11
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(user.role.as_str())
    .bind(&user.custom_role)
    .bind(user.overrides.view)
    .bind(user.overrides.create)
    .bind(user.overrides.sanction)
    .bind(user.overrides.access_settings)
    .bind(user.overrides.admin)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| not_found("users", id))?;

    if email_changed {
        sqlx::query("UPDATE incident_tracker.accounts SET email = $2 WHERE id = $1")
            .bind(id)
            .bind(&user.email)
            .execute(&mut *tx)
            .await?;
        info!(user_id = %id, "login email changed");
    }
    tx.commit().await?;
    user_from_row(&row)
}

pub async fn touch_last_login(pool: &PgPool, id: Uuid) -> GatewayResult<()> {
    sqlx::query("UPDATE incident_tracker.users SET last_login = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_user(pool: &PgPool, id: Uuid) -> GatewayResult<()> {
    let result = sqlx::query("DELETE FROM incident_tracker.users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found("users", id));
    }
    info!(user_id = %id, "user deleted");
    Ok(())
}

// Incidents

fn incident_from_row(row: &PgRow) -> GatewayResult<Incident> {
    let attachments: Json<Vec<Attachment>> = row.try_get("attachments")?;
    let sanctions: Json<Vec<Sanction>> = row.try_get("sanctions")?;
    Ok(Incident {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        student_ids: row.try_get("student_ids")?,
        date: row.try_get("date")?,
        severity: parsed::<Severity>("severity", row.try_get("severity")?)?,
        status: parsed::<IncidentStatus>("status", row.try_get("status")?)?,
        location: row.try_get("location")?,
        witnesses: row.try_get("witnesses")?,
        notes: row.try_get("notes")?,
        handwritten_notes: row.try_get("handwritten_notes")?,
        attachments: attachments.0,
        sanctions: sanctions.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        created_by: row.try_get("created_by")?,
        last_modified_by: row.try_get("last_modified_by")?,
    })
}

/// Newest first, matching how the incident list is shown.
pub async fn list_incidents(pool: &PgPool) -> GatewayResult<Vec<Incident>> {
    let rows = sqlx::query("SELECT * FROM incident_tracker.incidents ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(incident_from_row).collect()
}

pub async fn get_incident(pool: &PgPool, id: Uuid) -> GatewayResult<Incident> {
    let row = sqlx::query("SELECT * FROM incident_tracker.incidents WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found("incidents", id))?;
    incident_from_row(&row)
}

pub async fn create_incident(pool: &PgPool, incident: &Incident) -> GatewayResult<Incident> {
    let row = sqlx::query(
        r#"
        INSERT INTO incident_tracker.incidents
        (id, title, description, student_ids, date, severity, status, location,
         witnesses, notes, handwritten_notes, attachments, sanctions,
         created_at, updated_at, created_by, last_modified_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        RETURNING *
        "#,
    )
    .bind(incident.id)
    .bind(&incident.title)
    .bind(&incident.description)
    .bind(&incident.student_ids)
    .bind(incident.date)
    .bind(incident.severity.as_str())
    .bind(incident.status.as_str())
    .bind(&incident.location)
    .bind(&incident.witnesses)
    .bind(&incident.notes)
    .bind(&incident.handwritten_notes)
    .bind(Json(&incident.attachments))
    .bind(Json(&incident.sanctions))
    .bind(incident.created_at)
    .bind(incident.updated_at)
    .bind(incident.created_by)
    .bind(incident.last_modified_by)
    .fetch_one(pool)
    .await?;
    let created = incident_from_row(&row)?;
    info!(incident_id = %created.id, severity = created.severity.as_str(), "incident recorded");
    Ok(created)
}

/// Partial update for an incident. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct IncidentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub student_ids: Option<Vec<Uuid>>,
    pub date: Option<NaiveDate>,
    pub severity: Option<Severity>,
    pub status: Option<IncidentStatus>,
    pub location: Option<String>,
    pub witnesses: Option<Vec<String>>,
    pub notes: Option<String>,
    pub handwritten_notes: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
    pub sanctions: Option<Vec<Sanction>>,
}

impl IncidentPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.student_ids.as_ref().is_some_and(Vec::is_empty) {
            return Err(ValidationError::NoStudents);
        }
        for (field, value) in [
            ("title", &self.title),
            ("description", &self.description),
            ("location", &self.location),
        ] {
            if value.as_ref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ValidationError::MissingField(field));
            }
        }
        Ok(())
    }
}

pub async fn update_incident(
    pool: &PgPool,
    id: Uuid,
    patch: &IncidentPatch,
    modified_by: Uuid,
) -> anyhow::Result<Incident> {
    patch.validate()?;
    let row = sqlx::query(
        r#"
        UPDATE incident_tracker.incidents
        SET title = COALESCE($2, title),
            description = COALESCE($3, description),
            student_ids = COALESCE($4, student_ids),
            date = COALESCE($5, date),
            severity = COALESCE($6, severity),
            status = COALESCE($7, status),
            location = COALESCE($8, location),
            witnesses = COALESCE($9, witnesses),
            notes = COALESCE($10, notes),
            handwritten_notes = COALESCE($11, handwritten_notes),
            attachments = COALESCE($12, attachments),
            sanctions = COALESCE($13, sanctions),
            updated_at = now(),
            last_modified_by = $14
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&patch.title)
    .bind(&patch.description)
    .bind(&patch.student_ids)
    .bind(patch.date)
    .bind(patch.severity.map(|severity| severity.as_str()))
    .bind(patch.status.map(|status| status.as_str()))
    .bind(&patch.location)
    .bind(&patch.witnesses)
    .bind(&patch.notes)
    .bind(&patch.handwritten_notes)
    .bind(patch.attachments.as_ref().map(Json))
    .bind(patch.sanctions.as_ref().map(Json))
    .bind(modified_by)
    .fetch_optional(pool)
    .await
    .map_err(GatewayError::from)?
    .ok_or_else(|| not_found("incidents", id))?;
    let updated = incident_from_row(&row)?;
    debug!(incident_id = %id, "incident updated");
    Ok(updated)
}

pub async fn delete_incident(pool: &PgPool, id: Uuid) -> GatewayResult<()> {
    let result = sqlx::query("DELETE FROM incident_tracker.incidents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found("incidents", id));
    }
    info!(incident_id = %id, "incident deleted");
    Ok(())
}

// Saved reports

fn report_from_row(row: &PgRow) -> GatewayResult<SavedReport> {
    Ok(SavedReport {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        kind: parsed::<ReportKind>("kind", row.try_get("kind")?)?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
        incident_ids: row.try_get("incident_ids")?,
    })
}

pub async fn list_reports(pool: &PgPool) -> GatewayResult<Vec<SavedReport>> {
    let rows = sqlx::query("SELECT * FROM incident_tracker.rapports ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(report_from_row).collect()
}

pub async fn create_report(pool: &PgPool, report: &SavedReport) -> GatewayResult<SavedReport> {
    let row = sqlx::query(
        r#"
        INSERT INTO incident_tracker.rapports
        (id, title, kind, content, created_at, created_by, incident_ids)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(report.id)
    .bind(&report.title)
    .bind(report.kind.as_str())
    .bind(&report.content)
    .bind(report.created_at)
    .bind(report.created_by)
    .bind(&report.incident_ids)
    .fetch_one(pool)
    .await?;
    report_from_row(&row)
}

pub async fn update_report(
    pool: &PgPool,
    id: Uuid,
    title: Option<&str>,
    content: Option<&str>,
) -> GatewayResult<SavedReport> {
    let row = sqlx::query(
        r#"
        UPDATE incident_tracker.rapports
        SET title = COALESCE($2, title), content = COALESCE($3, content)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(content)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| not_found("rapports", id))?;
    report_from_row(&row)
}

pub async fn delete_report(pool: &PgPool, id: Uuid) -> GatewayResult<()> {
    let result = sqlx::query("DELETE FROM incident_tracker.rapports WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found("rapports", id));
    }
    Ok(())
}

// School settings

/// Falls back to defaults until an administrator saves the settings once.
pub async fn get_settings(pool: &PgPool) -> GatewayResult<SchoolSettings> {
    let row = sqlx::query("SELECT * FROM incident_tracker.school_settings WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(SchoolSettings::default());
    };
    Ok(SchoolSettings {
        school_name: row.try_get("school_name")?,
        school_logo: row.try_get("school_logo")?,
        principal_name: row.try_get("principal_name")?,
        principal_title: row.try_get("principal_title")?,
        address: row.try_get("address")?,
        allowed_domains: row.try_get("allowed_domains")?,
    })
}

pub async fn save_settings(pool: &PgPool, settings: &SchoolSettings) -> GatewayResult<()> {
    sqlx::query(
        r#"
        INSERT INTO incident_tracker.school_settings
        (id, school_name, school_logo, principal_name, principal_title, address, allowed_domains)
        VALUES (1, $1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET school_name = EXCLUDED.school_name,
            school_logo = EXCLUDED.school_logo,
            principal_name = EXCLUDED.principal_name,
            principal_title = EXCLUDED.principal_title,
            address = EXCLUDED.address,
            allowed_domains = EXCLUDED.allowed_domains
        "#,
    )
    .bind(&settings.school_name)
    .bind(&settings.school_logo)
    .bind(&settings.principal_name)
    .bind(&settings.principal_title)
    .bind(&settings.address)
    .bind(&settings.allowed_domains)
    .execute(pool)
    .await?;
    info!("school settings saved");
    Ok(())
}

// Seed data

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let admin_id = Uuid::parse_str("00000000-0000-4000-8000-000000000001")?;
    sqlx::query(
        r#"
        INSERT INTO incident_tracker.users (id, first_name, last_name, email, role)
        VALUES ($1, 'Hélène', 'Marchand', 'direction@college-jaures.fr', 'principal')
        ON CONFLICT (email) DO NOTHING
        "#,
    )
    .bind(admin_id)
    .execute(pool)
    .await?;

    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Lucas",
            "Bernard",
            "4ème B",
            "4ème",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Emma",
            "Petit",
            "4ème B",
            "4ème",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Noah",
            "Roux",
            "6ème A",
            "6ème",
        ),
    ];

    for (id, first_name, last_name, class, level) in &students {
        sqlx::query(
            r#"
            INSERT INTO incident_tracker.students (id, first_name, last_name, class, level)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(*id)
        .bind(*first_name)
        .bind(*last_name)
        .bind(*class)
        .bind(*level)
        .execute(pool)
        .await?;
    }

    let incidents = vec![
        (
            Uuid::parse_str("6b1f0e52-8f0c-4f0a-9d1e-2f7b1c3d4e01")?,
            "Bagarre dans la cour",
            vec![students[0].0, students[2].0],
            "high",
            "Cour de récréation",
            NaiveDate::from_ymd_opt(2026, 2, 2),
        ),
        (
            Uuid::parse_str("6b1f0e52-8f0c-4f0a-9d1e-2f7b1c3d4e02")?,
            "Insolence en cours",
            vec![students[1].0],
            "medium",
            "Salle 12",
            NaiveDate::from_ymd_opt(2026, 1, 30),
        ),
        (
            Uuid::parse_str("6b1f0e52-8f0c-4f0a-9d1e-2f7b1c3d4e03")?,
            "Retards répétés",
            vec![students[2].0],
            "low",
            "Vie scolaire",
            NaiveDate::from_ymd_opt(2026, 1, 28),
        ),
    ];

    for (id, title, student_ids, severity, location, date) in incidents {
        let date = date.ok_or_else(|| anyhow::anyhow!("invalid seed date"))?;
        sqlx::query(
            r#"
            INSERT INTO incident_tracker.incidents
            (id, title, description, student_ids, date, severity, status, location,
             created_by, last_modified_by)
            VALUES ($1, $2, $2, $3, $4, $5, 'in_progress', $6, $7, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(student_ids)
        .bind(date)
        .bind(severity)
        .bind(location)
        .bind(admin_id)
        .execute(pool)
        .await?;
    }

    Ok(())
}
