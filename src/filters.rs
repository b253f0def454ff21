use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{Incident, IncidentStatus, Severity};
use crate::report::{DateRange, Directory};

const RECENT_LIMIT: usize = 5;

/// Incident list filters. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub search: Option<String>,
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub class: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
}

impl IncidentFilter {
    pub fn matches(&self, incident: &Incident, directory: &Directory<'_>) -> bool {
        if self.status.is_some_and(|status| incident.status != status) {
            return false;
        }
        if self.severity.is_some_and(|severity| incident.severity != severity) {
            return false;
        }
        if !DateRange::new(self.date_start, self.date_end).contains(incident.date) {
            return false;
        }
        if let Some(class) = self.class.as_deref().filter(|class| !class.is_empty()) {
            let in_class = incident
                .student_ids
                .iter()
                .filter_map(|id| directory.student(*id))
                .any(|student| student.class == class);
            if !in_class {
                return false;
            }
        }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let in_title = incident.title.to_lowercase().contains(&term);
            let in_students = directory
                .student_names(&incident.student_ids)
                .to_lowercase()
                .contains(&term);
            if !in_title && !in_students {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, incidents: &'a [Incident], directory: &Directory<'_>) -> Vec<&'a Incident> {
        incidents
            .iter()
            .filter(|incident| self.matches(incident, directory))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats<'a> {
    pub total: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub high_severity: usize,
    pub by_class: BTreeMap<String, usize>,
    pub recent: Vec<&'a Incident>,
}

/// Headline counts. An incident counts once per distinct class of its students.
pub fn dashboard_stats<'a>(incidents: &'a [Incident], directory: &Directory<'_>) -> DashboardStats<'a> {
    let mut by_class = BTreeMap::new();
    for incident in incidents {
        let mut classes: Vec<&str> = incident
            .student_ids
            .iter()
            .filter_map(|id| directory.student(*id))
            .map(|student| student.class.as_str())
            .collect();
        classes.sort_unstable();
        classes.dedup();
        for class in classes {
            *by_class.entry(class.to_string()).or_insert(0) += 1;
        }
    }

    let mut recent: Vec<&Incident> = incidents.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(RECENT_LIMIT);

    DashboardStats {
        total: incidents.len(),
        in_progress: incidents
            .iter()
            .filter(|incident| incident.status == IncidentStatus::InProgress)
            .count(),
        resolved: incidents
            .iter()
            .filter(|incident| incident.status == IncidentStatus::Resolved)
            .count(),
        high_severity: incidents
            .iter()
            .filter(|incident| incident.severity == Severity::High)
            .count(),
        by_class,
        recent,
    }
}

/// Distinct class labels, sorted, for filter pickers.
pub fn available_classes(directory: &Directory<'_>) -> Vec<String> {
    let mut classes: Vec<String> = directory
        .students
        .iter()
        .map(|student| student.class.clone())
        .filter(|class| !class.is_empty())
        .collect();
    classes.sort();
    classes.dedup();
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Student;
    use crate::priority::fixtures::incident;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn student(first: &str, class: &str) -> Student {
        Student {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: "Durand".to_string(),
            class: class.to_string(),
            level: None,
            email: None,
            birth_date: None,
            parent_contact: None,
        }
    }

    #[test]
    fn search_matches_title_or_student_name() {
        let zoe = student("Zoé", "5ème A");
        let mut by_name = incident("Retard", Severity::Low, IncidentStatus::InProgress, day(1));
        by_name.student_ids = vec![zoe.id];
        let by_title = incident("Zoé absente", Severity::Low, IncidentStatus::InProgress, day(1));
        let neither = incident("Bavardage", Severity::Low, IncidentStatus::InProgress, day(1));
        let incidents = vec![by_name, by_title, neither];
        let students = vec![zoe];
        let directory = Directory::new(&students, &[]);

        let filter = IncidentFilter {
            search: Some("zoé".to_string()),
            ..IncidentFilter::default()
        };
        assert_eq!(filter.apply(&incidents, &directory).len(), 2);
    }

    #[test]
    fn class_status_and_dates_combine() {
        let a = student("Léo", "6ème A");
        let b = student("Mia", "6ème B");
        let mut first = incident("un", Severity::High, IncidentStatus::InProgress, day(2));
        first.student_ids = vec![a.id];
        let mut second = incident("deux", Severity::High, IncidentStatus::Resolved, day(3));
        second.student_ids = vec![a.id];
        let mut third = incident("trois", Severity::High, IncidentStatus::InProgress, day(9));
        third.student_ids = vec![b.id];
        let incidents = vec![first, second, third];
        let students = vec![a, b];
        let directory = Directory::new(&students, &[]);

        let filter = IncidentFilter {
            class: Some("6ème A".to_string()),
            status: Some(IncidentStatus::InProgress),
            date_end: Some(day(2)),
            ..IncidentFilter::default()
        };
        let hits = filter.apply(&incidents, &directory);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "un");
        assert_eq!(available_classes(&directory), vec!["6ème A", "6ème B"]);
    }

    #[test]
    fn stats_count_classes_and_recent_items() {
        let a = student("Léo", "4ème A");
        let b = student("Mia", "4ème A");
        let mut incidents: Vec<Incident> = (1..=7)
            .map(|d| incident("x", Severity::Medium, IncidentStatus::Resolved, day(d)))
            .collect();
        for (offset, item) in incidents.iter_mut().enumerate() {
            item.created_at = Utc::now() - Duration::hours(offset as i64);
        }
        incidents[0].student_ids = vec![a.id, b.id];
        incidents[0].severity = Severity::High;
        incidents[0].status = IncidentStatus::InProgress;
        let students = vec![a, b];
        let directory = Directory::new(&students, &[]);

        let stats = dashboard_stats(&incidents, &directory);
        assert_eq!(stats.total, 7);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.resolved, 6);
        assert_eq!(stats.high_severity, 1);
        assert_eq!(stats.by_class.get("4ème A"), Some(&1));
        assert_eq!(stats.recent.len(), 5);
        assert_eq!(stats.recent[0].id, incidents[0].id);
    }
}
