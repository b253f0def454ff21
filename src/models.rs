use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::permissions::{self, PermissionOverrides, PermissionSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Principal,
    Educator,
    Teacher,
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Principal => "principal",
            Role::Educator => "educator",
            Role::Teacher => "teacher",
            Role::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "Administrateur",
            Role::Principal => "Chef d'établissement",
            Role::Educator => "Éducateur de vie scolaire",
            Role::Teacher => "Professeur",
            Role::Other => "Autre",
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Role::Admin),
            "principal" => Ok(Role::Principal),
            "educator" => Ok(Role::Educator),
            "teacher" => Ok(Role::Teacher),
            "other" => Ok(Role::Other),
            _ => Err(ValidationError::UnknownValue {
                field: "role",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn rank(&self) -> u8 {
        match self {
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "Faible",
            Severity::Medium => "Moyenne",
            Severity::High => "Élevée",
        }
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(ValidationError::UnknownValue {
                field: "severity",
                value: value.to_string(),
            }),
        }
    }
}

/// New incidents start in progress. There is no "open" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    InProgress,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::InProgress => "in_progress",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IncidentStatus::InProgress => "En cours",
            IncidentStatus::Resolved => "Résolu",
        }
    }
}

impl FromStr for IncidentStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in_progress" => Ok(IncidentStatus::InProgress),
            "resolved" => Ok(IncidentStatus::Resolved),
            _ => Err(ValidationError::UnknownValue {
                field: "status",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionKind {
    OralWarning,
    WrittenNote,
    Detention,
    SuspendedSanction,
    TemporaryExclusion,
    PermanentExclusion,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Hours,
    Days,
}

impl DurationUnit {
    pub fn label(&self) -> &'static str {
        match self {
            DurationUnit::Hours => "heures",
            DurationUnit::Days => "jours",
        }
    }
}

impl SanctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanctionKind::OralWarning => "oral_warning",
            SanctionKind::WrittenNote => "written_note",
            SanctionKind::Detention => "detention",
            SanctionKind::SuspendedSanction => "suspended_sanction",
            SanctionKind::TemporaryExclusion => "temporary_exclusion",
            SanctionKind::PermanentExclusion => "permanent_exclusion",
            SanctionKind::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SanctionKind::OralWarning => "Avertissement oral",
            SanctionKind::WrittenNote => "Mot dans le carnet",
            SanctionKind::Detention => "Retenue",
            SanctionKind::SuspendedSanction => "Sanction avec sursis",
            SanctionKind::TemporaryExclusion => "Exclusion temporaire",
            SanctionKind::PermanentExclusion => "Exclusion définitive",
            SanctionKind::Other => "Autre",
        }
    }

    /// Only detentions (hours) and temporary exclusions (days) carry a length.
    pub fn duration_unit(&self) -> Option<DurationUnit> {
        match self {
            SanctionKind::Detention => Some(DurationUnit::Hours),
            SanctionKind::TemporaryExclusion => Some(DurationUnit::Days),
            _ => None,
        }
    }
}

impl FromStr for SanctionKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "oral_warning" => Ok(SanctionKind::OralWarning),
            "written_note" => Ok(SanctionKind::WrittenNote),
            "detention" => Ok(SanctionKind::Detention),
            "suspended_sanction" => Ok(SanctionKind::SuspendedSanction),
            "temporary_exclusion" => Ok(SanctionKind::TemporaryExclusion),
            "permanent_exclusion" => Ok(SanctionKind::PermanentExclusion),
            "other" => Ok(SanctionKind::Other),
            _ => Err(ValidationError::UnknownValue {
                field: "sanction type",
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub class: String,
    pub level: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub parent_contact: Option<String>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A student that has not been stored yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub class: String,
    pub level: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub parent_contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub custom_role: Option<String>,
    pub overrides: PermissionOverrides,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn permissions(&self) -> PermissionSet {
        self.overrides.apply(permissions::defaults_for(self.role))
    }

    /// The custom label wins over the role label when one was given.
    pub fn function_label(&self) -> &str {
        match (&self.role, &self.custom_role) {
            (Role::Other, Some(custom)) if !custom.trim().is_empty() => custom,
            (role, _) => role.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub custom_role: Option<String>,
    pub overrides: PermissionOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub data: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sanction {
    pub id: Uuid,
    pub kind: SanctionKind,
    pub custom_label: Option<String>,
    pub description: String,
    pub date: NaiveDate,
    pub duration: Option<u32>,
    pub applied: bool,
    pub applied_by: Option<Uuid>,
}

impl Sanction {
    pub fn type_label(&self) -> &str {
        match (&self.kind, &self.custom_label) {
            (SanctionKind::Other, Some(custom)) if !custom.trim().is_empty() => custom,
            (kind, _) => kind.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub student_ids: Vec<Uuid>,
    pub date: NaiveDate,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub location: String,
    pub witnesses: Vec<String>,
    pub notes: String,
    pub handwritten_notes: Option<String>,
    pub attachments: Vec<Attachment>,
    pub sanctions: Vec<Sanction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub last_modified_by: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolSettings {
    pub school_name: String,
    pub school_logo: Option<String>,
    pub principal_name: String,
    pub principal_title: String,
    pub address: String,
    pub allowed_domains: Option<Vec<String>>,
}

impl Default for SchoolSettings {
    fn default() -> Self {
        Self {
            school_name: "Mon Établissement".to_string(),
            school_logo: None,
            principal_name: String::new(),
            principal_title: "Chef d'établissement".to_string(),
            address: String::new(),
            allowed_domains: None,
        }
    }
}

impl SchoolSettings {
    /// An empty or missing list lets every domain through.
    pub fn allows_email(&self, email: &str) -> bool {
        let domains = match &self.allowed_domains {
            Some(domains) if !domains.is_empty() => domains,
            _ => return true,
        };
        let domain = match email.rsplit_once('@') {
            Some((_, domain)) => domain.to_ascii_lowercase(),
            None => return false,
        };
        domains
            .iter()
            .any(|allowed| allowed.trim_start_matches('@').eq_ignore_ascii_case(&domain))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Single,
    Summary,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Single => "single",
            ReportKind::Summary => "summary",
        }
    }
}

impl FromStr for ReportKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "single" => Ok(ReportKind::Single),
            "summary" => Ok(ReportKind::Summary),
            _ => Err(ValidationError::UnknownValue {
                field: "report type",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedReport {
    pub id: Uuid,
    pub title: String,
    pub kind: ReportKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub incident_ids: Vec<Uuid>,
}
