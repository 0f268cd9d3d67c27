use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{EtlStep, MigrationStatus};
use crate::error::{ConvertError, Result};

/// In-memory registry of migration statuses.
///
/// Readers get an `Arc` snapshot and never block each other. Writers apply
/// their change to a copy under the write lock and swap it in, so a reader
/// sees either the old or the new status, never a mix.
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    inner: Arc<RwLock<HashMap<Uuid, Arc<MigrationStatus>>>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new status, stamping `last_updated`.
    pub fn insert(&self, mut status: MigrationStatus) -> Arc<MigrationStatus> {
        status.last_updated = Utc::now();
        let status = Arc::new(status);
        self.inner.write().insert(status.id, Arc::clone(&status));
        status
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<MigrationStatus>> {
        self.inner
            .read()
            .get(&id)
            .cloned()
            .ok_or(ConvertError::UnknownMigration(id))
    }

    /// All statuses, oldest first.
    pub fn list(&self) -> Vec<Arc<MigrationStatus>> {
        let mut all: Vec<_> = self.inner.read().values().cloned().collect();
        all.sort_by_key(|s| (s.started_at, s.id));
        all
    }

    /// Apply a change and publish the result as a new version.
    pub fn update<F>(&self, id: Uuid, change: F) -> Result<Arc<MigrationStatus>>
    where
        F: FnOnce(&mut MigrationStatus),
    {
        let mut map = self.inner.write();
        let current = map.get(&id).ok_or(ConvertError::UnknownMigration(id))?;
        let mut next = MigrationStatus::clone(current);
        change(&mut next);
        Ok(publish(&mut map, next))
    }

    /// Move from `from` to `to`, failing without any change if the status
    /// is not currently in `from`.
    pub fn transition<F>(
        &self,
        id: Uuid,
        from: EtlStep,
        to: EtlStep,
        change: F,
    ) -> Result<Arc<MigrationStatus>>
    where
        F: FnOnce(&mut MigrationStatus),
    {
        let mut map = self.inner.write();
        let current = map.get(&id).ok_or(ConvertError::UnknownMigration(id))?;
        if current.step != from {
            return Err(ConvertError::InvalidTransition {
                id,
                from: current.step.to_string(),
                to: to.to_string(),
            });
        }
        let mut next = MigrationStatus::clone(current);
        next.step = to;
        change(&mut next);
        Ok(publish(&mut map, next))
    }
}

fn publish(
    map: &mut HashMap<Uuid, Arc<MigrationStatus>>,
    mut next: MigrationStatus,
) -> Arc<MigrationStatus> {
    next.version += 1;
    next.last_updated = Utc::now();
    let next = Arc::new(next);
    map.insert(next.id, Arc::clone(&next));
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unknown() {
        let store = StatusStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id), Err(ConvertError::UnknownMigration(x)) if x == id));
    }

    #[test]
    fn test_update_bumps_version_and_keeps_old_snapshot() {
        let store = StatusStore::new();
        let created = store.insert(MigrationStatus::new("m1"));
        assert_eq!(created.version, 0);

        let updated = store
            .update(created.id, |s| s.message = Some("hello".into()))
            .unwrap();

        assert_eq!(updated.version, 1);
        assert_eq!(created.message, None);
        assert_eq!(store.get(created.id).unwrap().message.as_deref(), Some("hello"));
    }

    #[test]
    fn test_transition_checks_current_step() {
        let store = StatusStore::new();
        let id = store.insert(MigrationStatus::new("m1")).id;

        let moved = store
            .transition(id, EtlStep::Created, EtlStep::ExtractionInProgress, |_| {})
            .unwrap();
        assert_eq!(moved.step, EtlStep::ExtractionInProgress);

        let err = store
            .transition(id, EtlStep::Created, EtlStep::ExtractionInProgress, |_| {})
            .unwrap_err();
        match err {
            ConvertError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "EXTRACTION_IN_PROGRESS");
                assert_eq!(to, "EXTRACTION_IN_PROGRESS");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(store.get(id).unwrap().version, 1);
    }

    #[test]
    fn test_concurrent_transition_has_one_winner() {
        let store = StatusStore::new();
        let id = store.insert(MigrationStatus::new("race")).id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .transition(id, EtlStep::Created, EtlStep::ExtractionInProgress, |_| {})
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(store.get(id).unwrap().version, 1);
    }

    #[test]
    fn test_list_all() {
        let store = StatusStore::new();
        store.insert(MigrationStatus::new("a"));
        store.insert(MigrationStatus::new("b"));
        assert_eq!(store.list().len(), 2);
    }
}
