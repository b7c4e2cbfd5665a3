//! Event filtering: database include set, subscribed event kinds, and the
//! optional hard-stop position. All parameters are fixed at start.

use std::collections::HashSet;

use crate::binlog::header::EventType;
use crate::checkpoint::Position;
use crate::config::CdcConfig;

pub struct EventFilter {
    databases: HashSet<String>,
    event_types: HashSet<EventType>,
    max_position: Option<Position>,
}

impl EventFilter {
    pub fn new(
        databases: HashSet<String>,
        event_types: HashSet<EventType>,
        max_position: Option<Position>,
    ) -> Self {
        Self {
            databases,
            event_types,
            max_position,
        }
    }

    pub fn from_config(config: &CdcConfig) -> Self {
        Self::new(
            config.databases.clone(),
            config.event_types.clone(),
            config.max_position.clone(),
        )
    }

    /// An empty include set admits every database.
    pub fn allows_database(&self, schema: &str) -> bool {
        self.databases.is_empty() || self.databases.contains(schema)
    }

    pub fn subscribes(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }

    /// True once an event would land at or past the configured maximum.
    pub fn reached_stop(&self, file: &str, position: u32) -> bool {
        matches!(&self.max_position,
            Some(max) if max.file == file && position >= max.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(list: &[EventType]) -> HashSet<EventType> {
        list.iter().copied().collect()
    }

    #[test]
    fn empty_database_set_admits_all() {
        let f = EventFilter::new(HashSet::new(), types(&[EventType::Query]), None);
        assert!(f.allows_database("anything"));
        assert!(f.allows_database(""));
    }

    #[test]
    fn database_set_is_exact() {
        let f = EventFilter::new(
            ["shop".to_string()].into_iter().collect(),
            types(&[EventType::Query]),
            None,
        );
        assert!(f.allows_database("shop"));
        assert!(!f.allows_database("shop_archive"));
        assert!(!f.allows_database(""));
    }

    #[test]
    fn unsubscribed_types_are_dropped() {
        let f = EventFilter::new(HashSet::new(), types(&[EventType::WriteRowsV2]), None);
        assert!(f.subscribes(EventType::WriteRowsV2));
        assert!(!f.subscribes(EventType::DeleteRowsV2));
        assert!(!f.subscribes(EventType::Xid));
    }

    #[test]
    fn stop_position_is_file_scoped_and_inclusive() {
        let f = EventFilter::new(
            HashSet::new(),
            HashSet::new(),
            Some(Position::new("mysql-bin.000009", 5000)),
        );
        assert!(!f.reached_stop("mysql-bin.000009", 4999));
        assert!(f.reached_stop("mysql-bin.000009", 5000));
        assert!(f.reached_stop("mysql-bin.000009", 5001));
        assert!(!f.reached_stop("mysql-bin.000008", 9000));

        let unbounded = EventFilter::new(HashSet::new(), HashSet::new(), None);
        assert!(!unbounded.reached_stop("mysql-bin.000009", u32::MAX));
    }
}
