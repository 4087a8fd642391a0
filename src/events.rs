//! Event catalog and post-hoc association of a change date with a known event.
//!
//! The catalog is optional context. An empty or absent catalog yields no
//! association and never fails the pipeline. Association is statistical
//! coincidence in time, nothing more.

use chrono::NaiveDate;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A dated real-world event
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventRecord {
    /// Calendar date of the event
    pub date: NaiveDate,
    /// Short event name
    pub name: String,
    /// Free-form description
    pub description: String,
}

impl EventRecord {
    /// Create a new event record
    pub fn new(date: NaiveDate, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            date,
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Rule used to pick a catalog entry for a change date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssociationPolicy {
    /// Minimum absolute day distance; ties go to the earlier event
    #[default]
    Nearest,
    /// Latest event dated on or before the change date
    MostRecentPrior,
}

/// The catalog entry matched to a change date
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventAssociation {
    /// Matched event
    pub event: EventRecord,
    /// `event.date - change_date` in days (negative: event came first)
    pub distance_days: i64,
}

/// Date-ordered, read-only set of events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventCatalog {
    records: Vec<EventRecord>,
}

impl EventCatalog {
    /// Build a catalog; records are sorted by date (stable for equal dates)
    pub fn new(mut records: Vec<EventRecord>) -> Self {
        records.sort_by_key(|r| r.date);
        Self { records }
    }

    /// Catalog with no events
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the catalog holds no events
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Events in date order
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Match `change_date` against the catalog under `policy`.
    pub fn associate(
        &self,
        change_date: NaiveDate,
        policy: AssociationPolicy,
    ) -> Option<EventAssociation> {
        let matched = match policy {
            AssociationPolicy::Nearest => self.nearest(change_date),
            AssociationPolicy::MostRecentPrior => self
                .records
                .iter()
                .rev()
                .find(|r| r.date <= change_date),
        }?;

        Some(EventAssociation {
            event: matched.clone(),
            distance_days: (matched.date - change_date).num_days(),
        })
    }

    fn nearest(&self, change_date: NaiveDate) -> Option<&EventRecord> {
        // Records are date-sorted, so the first minimum is the earlier event on ties
        let mut best: Option<(&EventRecord, i64)> = None;
        for record in &self.records {
            let distance = (record.date - change_date).num_days().abs();
            match best {
                Some((_, d)) if d <= distance => {}
                _ => best = Some((record, distance)),
            }
        }
        best.map(|(record, _)| record)
    }
}

/// Associate a change date with an optional catalog.
///
/// Returns `None` when the catalog is absent or empty.
pub fn associate_event(
    change_date: NaiveDate,
    catalog: Option<&EventCatalog>,
    policy: AssociationPolicy,
) -> Option<EventAssociation> {
    let catalog = catalog?;
    let association = catalog.associate(change_date, policy);
    match &association {
        Some(a) => log::info!(
            "Associated change date {} with event '{}' on {} ({} days)",
            change_date,
            a.event.name,
            a.event.date,
            a.distance_days
        ),
        None if catalog.is_empty() => {
            log::warn!("Event catalog is empty; event association skipped")
        }
        None => log::info!("No catalog event matches change date {}", change_date),
    }
    association
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn catalog() -> EventCatalog {
        EventCatalog::new(vec![
            EventRecord::new(date(2014, 11, 27), "OPEC holds output", "No production cut"),
            EventRecord::new(date(2008, 9, 15), "Lehman collapse", "Financial crisis"),
            EventRecord::new(date(2020, 3, 9), "Price war", "Saudi-Russia price war"),
        ])
    }

    #[test]
    fn test_catalog_is_sorted() {
        let c = catalog();
        assert_eq!(c.records()[0].name, "Lehman collapse");
        assert_eq!(c.records()[2].name, "Price war");
    }

    #[test]
    fn test_exact_date_has_zero_distance() {
        let a = catalog()
            .associate(date(2014, 11, 27), AssociationPolicy::Nearest)
            .unwrap();
        assert_eq!(a.event.name, "OPEC holds output");
        assert_eq!(a.distance_days, 0);
    }

    #[test]
    fn test_nearest_may_follow_change_date() {
        let a = catalog()
            .associate(date(2020, 3, 1), AssociationPolicy::Nearest)
            .unwrap();
        assert_eq!(a.event.name, "Price war");
        assert_eq!(a.distance_days, 8);
    }

    #[test]
    fn test_tie_prefers_earlier_event() {
        let c = EventCatalog::new(vec![
            EventRecord::new(date(2021, 1, 15), "later", ""),
            EventRecord::new(date(2021, 1, 5), "earlier", ""),
        ]);
        let a = c.associate(date(2021, 1, 10), AssociationPolicy::Nearest).unwrap();
        assert_eq!(a.event.name, "earlier");
        assert_eq!(a.distance_days, -5);
    }

    #[test]
    fn test_most_recent_prior_policy() {
        let c = catalog();
        let a = c
            .associate(date(2020, 3, 1), AssociationPolicy::MostRecentPrior)
            .unwrap();
        assert_eq!(a.event.name, "OPEC holds output");
        assert!(a.distance_days < 0);
        assert!(c
            .associate(date(2000, 1, 1), AssociationPolicy::MostRecentPrior)
            .is_none());
    }

    #[test]
    fn test_empty_or_absent_catalog_is_none() {
        let empty = EventCatalog::empty();
        assert!(associate_event(date(2020, 1, 1), Some(&empty), AssociationPolicy::Nearest).is_none());
        assert!(associate_event(date(2020, 1, 1), None, AssociationPolicy::Nearest).is_none());
    }
}
