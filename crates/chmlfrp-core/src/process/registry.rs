//! Tunnel → process association table.
//!
//! One [`ProcessRecord`] per spawned frpc process. A group start registers
//! the same record under every tunnel id of the group. Entries are removed
//! explicitly when the process exits or is stopped; lookups additionally
//! treat an exited record as absent.

use crate::error::Result;
use crate::tunnel::{TunnelGroup, TunnelId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// A spawned frpc process and the tunnels it serves.
#[derive(Debug)]
pub struct ProcessRecord {
    pid: u32,
    tunnels: TunnelGroup,
    log_path: Option<PathBuf>,
    exited: watch::Sender<bool>,
}

impl ProcessRecord {
    pub fn new(pid: u32, tunnels: TunnelGroup, log_path: Option<PathBuf>) -> Self {
        let (exited, _) = watch::channel(false);
        Self {
            pid,
            tunnels,
            log_path,
            exited,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn tunnels(&self) -> &TunnelGroup {
        &self.tunnels
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    pub(crate) fn mark_exited(&self) {
        self.exited.send_replace(true);
    }

    /// Wait until the process has exited and been reaped.
    pub async fn wait_exited(&self) {
        let mut rx = self.exited.subscribe();
        // The sender lives as long as `self`, so this only returns once exited.
        let _ = rx.wait_for(|exited| *exited).await;
    }
}

/// Result of an atomic check-and-register.
#[derive(Debug)]
pub(crate) enum Registration<T> {
    Registered(T),
    /// These tunnels already have a live process; nothing was spawned.
    Busy(Vec<TunnelId>),
}

/// Mapping from tunnel id to the process serving it.
///
/// All mutations go through one mutex, so concurrent starts and stops of
/// different groups cannot lose updates.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<TunnelId, Arc<ProcessRecord>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TunnelId, Arc<ProcessRecord>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Associate every tunnel of the record with it, replacing old entries.
    pub fn insert(&self, record: Arc<ProcessRecord>) {
        let mut entries = self.lock();
        for id in record.tunnels().ids() {
            entries.insert(*id, Arc::clone(&record));
        }
    }

    /// Live record for `id`. Exited records resolve to `None`.
    pub fn get(&self, id: TunnelId) -> Option<Arc<ProcessRecord>> {
        self.lock()
            .get(&id)
            .filter(|record| !record.has_exited())
            .cloned()
    }

    /// Remove the entry for `id` only. Other tunnels sharing the process
    /// keep their entries.
    pub fn remove(&self, id: TunnelId) -> Option<Arc<ProcessRecord>> {
        self.lock().remove(&id)
    }

    /// Remove every entry that still points at `record`.
    ///
    /// Entries that were re-registered to a newer process are left alone.
    pub fn remove_record(&self, record: &Arc<ProcessRecord>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, existing| !Arc::ptr_eq(existing, record));
        before - entries.len()
    }

    pub fn is_running(&self, id: TunnelId) -> bool {
        self.get(id).is_some()
    }

    /// Ids with a live process, sorted.
    pub fn running_ids(&self) -> Vec<TunnelId> {
        let mut ids: Vec<TunnelId> = self
            .lock()
            .iter()
            .filter(|(_, record)| !record.has_exited())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Distinct live records.
    pub fn records(&self) -> Vec<Arc<ProcessRecord>> {
        let entries = self.lock();
        let mut records: Vec<Arc<ProcessRecord>> = Vec::new();
        for record in entries.values() {
            if !record.has_exited() && !records.iter().any(|r| Arc::ptr_eq(r, record)) {
                records.push(Arc::clone(record));
            }
        }
        records
    }

    /// Number of registered tunnel ids (exited or not).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Register the process produced by `spawn` unless a tunnel of `group`
    /// is already running. The check, `spawn` and the insert run under one
    /// lock, so two concurrent starts of the same tunnel cannot both spawn.
    pub(crate) fn register_if_idle<T>(
        &self,
        group: &TunnelGroup,
        spawn: impl FnOnce() -> Result<(Arc<ProcessRecord>, T)>,
    ) -> Result<Registration<(Arc<ProcessRecord>, T)>> {
        let mut entries = self.lock();

        let busy: Vec<TunnelId> = group
            .ids()
            .iter()
            .filter(|id| entries.get(id).is_some_and(|record| !record.has_exited()))
            .copied()
            .collect();
        if !busy.is_empty() {
            return Ok(Registration::Busy(busy));
        }

        let (record, extra) = spawn()?;
        for id in record.tunnels().ids() {
            entries.insert(*id, Arc::clone(&record));
        }
        Ok(Registration::Registered((record, extra)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use std::time::Duration;

    fn record(pid: u32, ids: &[u64]) -> Arc<ProcessRecord> {
        let group = TunnelGroup::new(ids.iter().copied().map(TunnelId)).unwrap();
        Arc::new(ProcessRecord::new(pid, group, None))
    }

    #[test]
    fn test_empty_registry() {
        let registry = ProcessRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.is_running(TunnelId(1)));
        assert!(registry.get(TunnelId(1)).is_none());
        assert!(registry.running_ids().is_empty());
    }

    #[test]
    fn test_group_shares_one_record() {
        let registry = ProcessRegistry::new();
        let rec = record(100, &[1, 2, 3]);
        registry.insert(Arc::clone(&rec));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.records().len(), 1);
        for id in [1, 2, 3] {
            let found = registry.get(TunnelId(id)).unwrap();
            assert!(Arc::ptr_eq(&found, &rec));
        }
    }

    #[test]
    fn test_remove_single_key_keeps_others() {
        let registry = ProcessRegistry::new();
        registry.insert(record(100, &[1, 2]));

        assert!(registry.remove(TunnelId(1)).is_some());
        assert!(!registry.is_running(TunnelId(1)));
        assert!(registry.is_running(TunnelId(2)));
    }

    #[test]
    fn test_exited_record_treated_as_absent() {
        let registry = ProcessRegistry::new();
        let rec = record(100, &[1, 2]);
        registry.insert(Arc::clone(&rec));

        rec.mark_exited();

        assert!(!registry.is_running(TunnelId(1)));
        assert!(registry.get(TunnelId(2)).is_none());
        assert!(registry.running_ids().is_empty());
        assert!(registry.records().is_empty());
        // Still physically present until removed
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.remove_record(&rec), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_record_leaves_newer_process() {
        let registry = ProcessRegistry::new();
        let old = record(100, &[1, 2]);
        registry.insert(Arc::clone(&old));

        let newer = record(200, &[2]);
        registry.insert(Arc::clone(&newer));

        assert_eq!(registry.remove_record(&old), 1);
        assert!(!registry.is_running(TunnelId(1)));
        assert_eq!(registry.get(TunnelId(2)).unwrap().pid(), 200);
    }

    #[test]
    fn test_register_if_idle_refuses_busy_tunnels() {
        let registry = ProcessRegistry::new();
        registry.insert(record(100, &[2]));

        let group = TunnelGroup::new([1, 2, 3].map(TunnelId)).unwrap();
        let mut spawned = false;
        let result = registry
            .register_if_idle(&group, || {
                spawned = true;
                Ok((record(200, &[1, 2, 3]), ()))
            })
            .unwrap();

        assert!(!spawned);
        match result {
            Registration::Busy(ids) => assert_eq!(ids, vec![TunnelId(2)]),
            Registration::Registered(_) => panic!("busy tunnel was re-registered"),
        }
        assert!(!registry.is_running(TunnelId(1)));
    }

    #[test]
    fn test_register_if_idle_registers_group() {
        let registry = ProcessRegistry::new();
        let group = TunnelGroup::new([4, 5].map(TunnelId)).unwrap();

        let result = registry
            .register_if_idle(&group, || Ok((record(300, &[4, 5]), "child")))
            .unwrap();

        assert!(matches!(result, Registration::Registered((_, "child"))));
        assert_eq!(registry.running_ids(), vec![TunnelId(4), TunnelId(5)]);
    }

    #[test]
    fn test_register_if_idle_propagates_spawn_error() {
        let registry = ProcessRegistry::new();
        let group = TunnelGroup::from(TunnelId(1));

        let result = registry.register_if_idle::<()>(&group, || Err(TunnelError::MissingToken));
        assert!(matches!(result, Err(TunnelError::MissingToken)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_wait_exited() {
        let rec = record(1, &[1]);
        assert!(!rec.has_exited());

        let waiter = {
            let rec = Arc::clone(&rec);
            tokio::spawn(async move { rec.wait_exited().await })
        };
        rec.mark_exited();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_exited did not return")
            .unwrap();
        assert!(rec.has_exited());
    }
}
