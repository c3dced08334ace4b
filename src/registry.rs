use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Registry key. The pair keeps sensors with the same name on different
/// machines from colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorKey {
    pub machine_id: String,
    pub sensor_id: String,
}

impl SensorKey {
    pub fn new(machine_id: impl Into<String>, sensor_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            sensor_id: sensor_id.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensorSubscription {
    pub machine_id: String,
    pub sensor_id: String,
    pub last_seen: DateTime<Utc>,
    pub alarmed: bool,
}

impl SensorSubscription {
    pub fn key(&self) -> SensorKey {
        SensorKey::new(self.machine_id.clone(), self.sensor_id.clone())
    }
}

/// In-memory table of every sensor observed since startup. Entries are never
/// evicted; a sensor that goes quiet stays registered (and alarming) for the
/// process lifetime.
#[derive(Debug, Default)]
pub struct RegistryState {
    last_seen: HashMap<SensorKey, DateTime<Utc>>,
    alarmed: HashSet<SensorKey>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh (or create) the entry for `key`. A fresh reading also clears
    /// the alarmed mark so alarm-once mode re-arms for the next outage.
    pub fn upsert(&mut self, key: SensorKey, now: DateTime<Utc>) {
        self.alarmed.remove(&key);
        self.last_seen.insert(key, now);
    }

    pub fn mark_alarmed(&mut self, key: &SensorKey) {
        self.alarmed.insert(key.clone());
    }

    /// Owned copy of all entries so the sweeper can iterate without holding
    /// the registry lock across network sends.
    pub fn snapshot(&self) -> Vec<SensorSubscription> {
        self.last_seen
            .iter()
            .map(|(key, last_seen)| SensorSubscription {
                machine_id: key.machine_id.clone(),
                sensor_id: key.sensor_id.clone(),
                last_seen: *last_seen,
                alarmed: self.alarmed.contains(key),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{RegistryState, SensorKey};
    use chrono::{Duration, Utc};

    #[test]
    fn upsert_refreshes_existing_entry() {
        let mut state = RegistryState::new();
        let key = SensorKey::new("host1", "cpu");
        let earlier = Utc::now() - Duration::seconds(30);
        let now = Utc::now();

        state.upsert(key.clone(), earlier);
        state.upsert(key.clone(), now);

        assert_eq!(state.len(), 1);
        let snapshot = state.snapshot();
        assert_eq!(snapshot[0].last_seen, now);
    }

    #[test]
    fn same_sensor_name_on_two_machines_is_two_entries() {
        let mut state = RegistryState::new();
        let now = Utc::now();
        state.upsert(SensorKey::new("host1", "cpu"), now);
        state.upsert(SensorKey::new("host2", "cpu"), now);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn upsert_clears_alarmed_mark() {
        let mut state = RegistryState::new();
        let key = SensorKey::new("host1", "cpu");
        state.upsert(key.clone(), Utc::now() - Duration::seconds(60));
        state.mark_alarmed(&key);
        assert!(state.snapshot()[0].alarmed);

        state.upsert(key, Utc::now());
        assert!(!state.snapshot()[0].alarmed);
    }

    #[test]
    fn snapshot_is_detached_from_state() {
        let mut state = RegistryState::new();
        state.upsert(SensorKey::new("host1", "cpu"), Utc::now());
        let snapshot = state.snapshot();
        state.upsert(SensorKey::new("host1", "mem"), Utc::now());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(state.len(), 2);
    }
}
