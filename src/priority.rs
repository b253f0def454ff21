use std::cmp::Reverse;

use chrono::NaiveDate;

use crate::models::{Incident, IncidentStatus};

pub const DASHBOARD_LIMIT: usize = 10;

/// In-progress incidents, most severe first, then oldest first.
pub fn prioritize(incidents: &[Incident]) -> Vec<&Incident> {
    let mut open: Vec<&Incident> = incidents
        .iter()
        .filter(|incident| incident.status == IncidentStatus::InProgress)
        .collect();

    // sort_by_key is stable, so equal keys keep their input order.
    open.sort_by_key(|incident| (Reverse(incident.severity.rank()), incident.date));
    open
}

pub fn dashboard_queue(incidents: &[Incident]) -> Vec<&Incident> {
    let mut queue = prioritize(incidents);
    queue.truncate(DASHBOARD_LIMIT);
    queue
}

pub fn days_open(date: NaiveDate, today: NaiveDate) -> i64 {
    (today - date).num_days().max(0)
}
