use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::{
    Attachment, Incident, IncidentStatus, Sanction, SanctionKind, Severity, User,
};
use crate::permissions::{self, Permission};

/// Form state for a new or edited incident.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentDraft {
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
}

impl IncidentDraft {
    /// Fresh drafts open as in-progress with medium severity.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            student_ids: Vec::new(),
            date,
            severity: Severity::Medium,
            status: IncidentStatus::InProgress,
            location: String::new(),
            witnesses: Vec::new(),
            notes: String::new(),
            handwritten_notes: None,
            attachments: Vec::new(),
            sanctions: Vec::new(),
        }
    }

    pub fn from_incident(incident: &Incident) -> Self {
        Self {
            title: incident.title.clone(),
            description: incident.description.clone(),
            student_ids: incident.student_ids.clone(),
            date: incident.date,
            severity: incident.severity,
            status: incident.status,
            location: incident.location.clone(),
            witnesses: incident.witnesses.clone(),
            notes: incident.notes.clone(),
            handwritten_notes: incident.handwritten_notes.clone(),
            attachments: incident.attachments.clone(),
            sanctions: incident.sanctions.clone(),
        }
    }

    pub fn toggle_student(&mut self, id: Uuid) {
        if let Some(pos) = self.student_ids.iter().position(|existing| *existing == id) {
            self.student_ids.remove(pos);
        } else {
            self.student_ids.push(id);
        }
    }

    pub fn append_transcript(&mut self, transcript: &str) {
        self.notes = append_transcript(&self.notes, transcript);
    }

    /// Checks required fields and drops blank witnesses.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if self.description.trim().is_empty() {
            return Err(ValidationError::MissingField("description"));
        }
        if self.location.trim().is_empty() {
            return Err(ValidationError::MissingField("location"));
        }
        if self.student_ids.is_empty() {
            return Err(ValidationError::NoStudents);
        }
        self.witnesses = self
            .witnesses
            .into_iter()
            .map(|witness| witness.trim().to_string())
            .filter(|witness| !witness.is_empty())
            .collect();
        Ok(self)
    }

    pub fn into_incident(self, author: Uuid) -> Incident {
        let now = Utc::now();
        Incident {
            id: Uuid::new_v4(),
            title: self.title,
            description: self.description,
            student_ids: self.student_ids,
            date: self.date,
            severity: self.severity,
            status: self.status,
            location: self.location,
            witnesses: self.witnesses,
            notes: self.notes,
            handwritten_notes: self.handwritten_notes,
            attachments: self.attachments,
            sanctions: self.sanctions,
            created_at: now,
            updated_at: now,
            created_by: author,
            last_modified_by: author,
        }
    }
}

/// Dictated text joins existing notes with a single space. Empty dictation is a no-op.
pub fn append_transcript(existing: &str, transcript: &str) -> String {
    if transcript.is_empty() {
        existing.to_string()
    } else if existing.is_empty() {
        transcript.to_string()
    } else {
        format!("{existing} {transcript}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanctionDraft {
    pub kind: SanctionKind,
    pub custom_label: Option<String>,
    pub description: String,
    pub date: NaiveDate,
    pub duration: Option<u32>,
    pub applied: bool,
}

impl SanctionDraft {
    /// Durations only stick to kinds measured in hours or days; custom labels only to `other`.
    pub fn into_sanction(self, applied_by: Uuid) -> Result<Sanction, ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::MissingField("sanction description"));
        }
        let duration = self.kind.duration_unit().and(self.duration);
        let custom_label = match self.kind {
            SanctionKind::Other => self.custom_label.filter(|label| !label.trim().is_empty()),
            _ => None,
        };

        Ok(Sanction {
            id: Uuid::new_v4(),
            kind: self.kind,
            custom_label,
            description: self.description,
            date: self.date,
            duration,
            applied: self.applied,
            applied_by: self.applied.then_some(applied_by),
        })
    }
}

/// Only users holding the sanction flag may add sanctions.
pub fn add_sanction(
    incident: &mut Incident,
    draft: SanctionDraft,
    actor: &User,
) -> anyhow::Result<()> {
    permissions::require(actor, Permission::Sanction)?;
    let sanction = draft.into_sanction(actor.id)?;
    incident.sanctions.push(sanction);
    touch(incident, actor.id);
    Ok(())
}

pub fn touch(incident: &mut Incident, actor: Uuid) {
    incident.updated_at = Utc::now();
    incident.last_modified_by = actor;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::permissions::PermissionOverrides;
    use crate::priority::fixtures::incident;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            first_name: "Paul".to_string(),
            last_name: "Girard".to_string(),
            email: "paul.girard@college.fr".to_string(),
            role,
            custom_role: None,
            overrides: PermissionOverrides::default(),
            created_at: Utc::now(),
            last_login: None,
        }
    }

    fn complete_draft() -> IncidentDraft {
        let mut draft = IncidentDraft::new(day(2));
        draft.title = "Dégradation".to_string();
        draft.description = "Table taguée en salle 12".to_string();
        draft.location = "Salle 12".to_string();
        draft.student_ids.push(Uuid::new_v4());
        draft
    }

    fn sanction_draft(kind: SanctionKind) -> SanctionDraft {
        SanctionDraft {
            kind,
            custom_label: Some("Réparation".to_string()),
            description: "Nettoyer la table".to_string(),
            date: day(3),
            duration: Some(2),
            applied: true,
        }
    }

    #[test]
    fn submit_requires_at_least_one_student() {
        let mut draft = complete_draft();
        draft.student_ids.clear();
        assert_eq!(draft.validate(), Err(ValidationError::NoStudents));
    }

    #[test]
    fn submit_requires_title() {
        let mut draft = complete_draft();
        draft.title = "   ".to_string();
        assert_eq!(draft.validate(), Err(ValidationError::MissingField("title")));
    }

    #[test]
    fn blank_witnesses_are_dropped() {
        let mut draft = complete_draft();
        draft.witnesses = vec!["".to_string(), " Mme Blanc ".to_string(), "  ".to_string()];
        let draft = draft.validate().unwrap();
        assert_eq!(draft.witnesses, vec!["Mme Blanc"]);
    }

    #[test]
    fn toggling_a_student_twice_removes_it() {
        let mut draft = IncidentDraft::new(day(1));
        let id = Uuid::new_v4();
        draft.toggle_student(id);
        assert_eq!(draft.student_ids, vec![id]);
        draft.toggle_student(id);
        assert!(draft.student_ids.is_empty());
    }

    #[test]
    fn transcript_is_appended_with_a_space() {
        let mut draft = IncidentDraft::new(day(1));
        draft.append_transcript("premier");
        draft.append_transcript("second");
        assert_eq!(draft.notes, "premier second");
    }

    #[test]
    fn empty_transcript_leaves_notes_untouched() {
        assert_eq!(append_transcript("notes", ""), "notes");
        assert_eq!(append_transcript("", ""), "");
    }

    #[test]
    fn sanction_duration_only_kept_for_timed_kinds() {
        let actor = Uuid::new_v4();
        let detention = sanction_draft(SanctionKind::Detention).into_sanction(actor).unwrap();
        assert_eq!(detention.duration, Some(2));
        assert_eq!(detention.custom_label, None);
        assert_eq!(detention.applied_by, Some(actor));

        let warning = sanction_draft(SanctionKind::OralWarning).into_sanction(actor).unwrap();
        assert_eq!(warning.duration, None);

        let other = sanction_draft(SanctionKind::Other).into_sanction(actor).unwrap();
        assert_eq!(other.type_label(), "Réparation");
    }

    #[test]
    fn sanction_needs_description() {
        let mut draft = sanction_draft(SanctionKind::WrittenNote);
        draft.description = " ".to_string();
        assert!(draft.into_sanction(Uuid::new_v4()).is_err());
    }

    #[test]
    fn teachers_cannot_sanction_but_principals_can() {
        let mut item = incident("Retard", Severity::Low, IncidentStatus::InProgress, day(5));
        let teacher = user(Role::Teacher);
        assert!(add_sanction(&mut item, sanction_draft(SanctionKind::Detention), &teacher).is_err());
        assert!(item.sanctions.is_empty());

        let principal = user(Role::Principal);
        add_sanction(&mut item, sanction_draft(SanctionKind::Detention), &principal).unwrap();
        assert_eq!(item.sanctions.len(), 1);
        assert_eq!(item.last_modified_by, principal.id);
    }
}
