//! Persistent container state.
//!
//! Every container owns `<root>/containers/<id>/`, holding its record
//! (`config.json`) and captured output. Names map to ids through one
//! small file per name under `<root>/names/`, so lookups never scan.
//! Writes go through [`corral_common::persist`] and are atomic.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use corral_common::config::RuntimeConfig;
use corral_common::constants::{CONFIG_FILE, LOG_FILE};
use corral_common::error::{CorralError, Result};
use corral_common::persist;
use corral_common::types::{ContainerId, ContainerStatus};

use crate::record::{ContainerRecord, RECORD_SCHEMA_VERSION, validate_name};

/// Shortest id prefix accepted as a container reference.
const MIN_PREFIX_LEN: usize = 4;

/// Directory-backed container store.
#[derive(Debug, Clone)]
pub struct StateStore {
    containers: PathBuf,
    names: PathBuf,
}

impl StateStore {
    /// Store under the paths of `config`.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            containers: config.containers_dir(),
            names: config.names_dir(),
        }
    }

    /// Directory owned by container `id`.
    #[must_use]
    pub fn container_dir(&self, id: &ContainerId) -> PathBuf {
        self.containers.join(id.as_str())
    }

    fn record_path(&self, id: &ContainerId) -> PathBuf {
        self.container_dir(id).join(CONFIG_FILE)
    }

    fn name_path(&self, name: &str) -> PathBuf {
        self.names.join(name)
    }

    /// Captured output of container `id`.
    #[must_use]
    pub fn log_path(&self, id: &ContainerId) -> PathBuf {
        self.container_dir(id).join(LOG_FILE)
    }

    /// Creates the container directory, for files that must exist before
    /// the record is written.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn prepare(&self, id: &ContainerId) -> Result<PathBuf> {
        let dir = self.container_dir(id);
        std::fs::create_dir_all(&dir).map_err(|e| CorralError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Persists a new record and claims its name.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the id already has a record or the
    /// name is held by another existing record.
    pub fn record(&self, record: &ContainerRecord) -> Result<()> {
        let _ = self.prepare(&record.id)?;
        let path = self.record_path(&record.id);
        if path.exists() {
            return Err(CorralError::validation(format!(
                "container {} already exists",
                record.id
            )));
        }
        if let Some(name) = &record.name {
            self.claim_name(name, &record.id)?;
        }
        if let Err(e) = persist::write_json(&path, record) {
            if let Some(name) = &record.name {
                self.release_name(name, &record.id);
            }
            return Err(e);
        }
        tracing::debug!(id = %record.id, "container record written");
        Ok(())
    }

    /// Fails if `name` is held by an existing container.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed or taken names.
    pub fn ensure_name_available(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        match self.name_holder(name)? {
            Some(holder) if self.holds_name(&holder) => Err(name_taken(name, &holder)),
            _ => Ok(()),
        }
    }

    fn name_holder(&self, name: &str) -> Result<Option<ContainerId>> {
        let path = self.name_path(name);
        match std::fs::read_to_string(&path) {
            Ok(id) => Ok(Some(ContainerId::new(id.trim()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CorralError::Io { path, source: e }),
        }
    }

    /// A name entry stays live while its holder's directory exists, which
    /// covers a `run` that has claimed the name but not yet written its
    /// record.
    fn holds_name(&self, holder: &ContainerId) -> bool {
        self.container_dir(holder).exists()
    }

    fn claim_name(&self, name: &str, id: &ContainerId) -> Result<()> {
        validate_name(name)?;
        std::fs::create_dir_all(&self.names).map_err(|e| CorralError::Io {
            path: self.names.clone(),
            source: e,
        })?;
        let path = self.name_path(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => file
                .write_all(id.as_str().as_bytes())
                .map_err(|e| CorralError::Io { path, source: e }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match self.name_holder(name)? {
                    Some(holder) if self.holds_name(&holder) => {
                        Err(name_taken(name, &holder))
                    }
                    _ => {
                        tracing::debug!(name, "replacing stale name entry");
                        persist::write_atomic(&path, id.as_str().as_bytes())
                    }
                }
            }
            Err(e) => Err(CorralError::Io { path, source: e }),
        }
    }

    fn release_name(&self, name: &str, id: &ContainerId) {
        if matches!(self.name_holder(name), Ok(Some(holder)) if holder == *id) {
            if let Err(e) = std::fs::remove_file(self.name_path(name)) {
                tracing::warn!(name, error = %e, "name entry not removed");
            }
        }
    }

    /// Loads the record of `id`.
    ///
    /// # Errors
    ///
    /// Returns not-found if there is no record, and an error if it cannot
    /// be read or was written by a newer schema.
    pub fn get(&self, id: &ContainerId) -> Result<ContainerRecord> {
        let record: ContainerRecord =
            persist::read_json(&self.record_path(id))?.ok_or_else(|| not_found(id.as_str()))?;
        persist::check_schema("container", record.schema_version, RECORD_SCHEMA_VERSION)?;
        Ok(record)
    }

    /// Loads the record of `id`, trusting the process table over the
    /// stored status: a RUNNING record whose pid is gone is rewritten as
    /// STOPPED before it is returned.
    ///
    /// # Errors
    ///
    /// Same as [`StateStore::get`] and [`StateStore::update`].
    pub fn get_reconciled(&self, id: &ContainerId) -> Result<ContainerRecord> {
        let mut record = self.get(id)?;
        if record.status == ContainerStatus::Running
            && !record.pid.is_some_and(corral_core::process::is_alive)
        {
            tracing::info!(id = %id, pid = ?record.pid, "process gone; reconciling to stopped");
            record.mark_stopped();
            self.update(&record)?;
        }
        Ok(record)
    }

    /// Maps an id, a name, or a unique id prefix to an id.
    ///
    /// # Errors
    ///
    /// Returns not-found if nothing matches and a validation error if a
    /// prefix is ambiguous.
    pub fn resolve(&self, reference: &str) -> Result<ContainerId> {
        if reference.is_empty() || reference.contains('/') || reference.starts_with('.') {
            return Err(not_found(reference));
        }
        let direct = ContainerId::new(reference);
        if self.record_path(&direct).exists() {
            return Ok(direct);
        }
        if let Some(holder) = self.name_holder(reference)? {
            if self.record_path(&holder).exists() {
                return Ok(holder);
            }
        }
        if reference.len() >= MIN_PREFIX_LEN {
            let matches: Vec<ContainerId> = self
                .ids()?
                .into_iter()
                .filter(|id| id.as_str().starts_with(reference))
                .collect();
            match matches.as_slice() {
                [one] => return Ok(one.clone()),
                [] => {}
                _ => {
                    return Err(CorralError::validation(format!(
                        "'{reference}' matches {} containers",
                        matches.len()
                    )));
                }
            }
        }
        Err(not_found(reference))
    }

    /// Replaces the record of an existing container.
    ///
    /// # Errors
    ///
    /// Returns not-found if the container was deleted meanwhile; a
    /// deleted record is never recreated.
    pub fn update(&self, record: &ContainerRecord) -> Result<()> {
        if !self.container_dir(&record.id).is_dir() {
            return Err(not_found(record.id.as_str()));
        }
        persist::write_json(&self.record_path(&record.id), record)?;
        tracing::debug!(id = %record.id, status = %record.status, "container record updated");
        Ok(())
    }

    /// Removes container `id` and its name entry. Returns whether
    /// anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self, id: &ContainerId) -> Result<bool> {
        if let Ok(record) = self.get(id) {
            if let Some(name) = &record.name {
                self.release_name(name, id);
            }
        }
        let removed = persist::remove_dir_idempotent(&self.container_dir(id))?;
        if removed {
            tracing::debug!(id = %id, "container state deleted");
        }
        Ok(removed)
    }

    fn ids(&self) -> Result<Vec<ContainerId>> {
        let entries = match std::fs::read_dir(&self.containers) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CorralError::Io {
                    path: self.containers.clone(),
                    source: e,
                });
            }
        };
        Ok(entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().join(CONFIG_FILE).is_file())
            .map(|e| ContainerId::new(e.file_name().to_string_lossy()))
            .collect())
    }

    /// Every stored record, oldest first. Unreadable records are logged
    /// and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let mut records: Vec<ContainerRecord> = self
            .ids()?
            .iter()
            .filter_map(|id| match self.get(id) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping unreadable container record");
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Containers directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.containers
    }
}

fn not_found(reference: &str) -> CorralError {
    CorralError::NotFound {
        kind: "container",
        id: reference.to_owned(),
    }
}

fn name_taken(name: &str, holder: &ContainerId) -> CorralError {
    CorralError::validation(format!(
        "name '{name}' is already used by container {}",
        holder.short()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample;

    fn store(dir: &Path) -> StateStore {
        StateStore::new(&RuntimeConfig::with_root(dir))
    }

    #[test]
    fn record_then_get_is_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let record = sample();
        store.record(&record).expect("record");
        assert_eq!(store.get(&record.id).expect("get"), record);
    }

    #[test]
    fn names_resolve_and_are_unique() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let record = sample();
        store.record(&record).expect("record");
        assert_eq!(store.resolve("c1").expect("by name"), record.id);
        assert_eq!(store.resolve("01234567").expect("by prefix"), record.id);

        let mut other = sample();
        other.id = ContainerId::new("ffffffffffffffffffffffffffffffff");
        let err = store.record(&other).expect_err("name taken");
        assert!(matches!(err, CorralError::Validation { .. }));
        assert!(store.ensure_name_available("c1").is_err());
    }

    #[test]
    fn stale_name_entries_are_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let record = sample();
        store.record(&record).expect("record");
        // Simulate a crash that removed the record but not the name.
        let _ = persist::remove_dir_idempotent(&store.container_dir(&record.id)).expect("rm");

        let mut other = sample();
        other.id = ContainerId::new("ffffffffffffffffffffffffffffffff");
        store.ensure_name_available("c1").expect("stale name is free");
        store.record(&other).expect("record reuses name");
        assert_eq!(store.resolve("c1").expect("resolve"), other.id);
    }

    #[test]
    fn names_held_by_an_unrecorded_container_are_not_reclaimed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let first = sample();
        let _ = store.prepare(&first.id).expect("prepare");
        store.claim_name("c1", &first.id).expect("claim");

        let mut second = sample();
        second.id = ContainerId::new("ffffffffffffffffffffffffffffffff");
        assert!(store.ensure_name_available("c1").is_err());
        let err = store.record(&second).expect_err("name is in flight");
        assert!(matches!(err, CorralError::Validation { .. }));

        store.record(&first).expect("holder finishes its record");
        assert_eq!(store.resolve("c1").expect("resolve"), first.id);
    }

    #[test]
    fn delete_removes_record_and_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let record = sample();
        store.record(&record).expect("record");

        assert!(store.delete(&record.id).expect("delete"));
        assert!(store.get(&record.id).expect_err("gone").is_not_found());
        assert!(store.resolve("c1").expect_err("name gone").is_not_found());
        assert!(!store.delete(&record.id).expect("idempotent"));
    }

    #[test]
    fn update_never_resurrects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let mut record = sample();
        store.record(&record).expect("record");
        let _ = store.delete(&record.id).expect("delete");

        record.mark_stopped();
        assert!(store.update(&record).expect_err("deleted").is_not_found());
        assert!(!store.container_dir(&record.id).exists());
    }

    #[test]
    fn reconcile_marks_dead_process_stopped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let dead_pid = child.id();
        let _ = child.wait().expect("wait");

        let mut record = sample();
        record.pid = Some(dead_pid);
        store.record(&record).expect("record");

        let reconciled = store.get_reconciled(&record.id).expect("reconcile");
        assert_eq!(reconciled.status, ContainerStatus::Stopped);
        assert!(reconciled.pid.is_none());
        assert_eq!(store.get(&record.id).expect("get").status, ContainerStatus::Stopped);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let mut record = sample();
        record.schema_version = RECORD_SCHEMA_VERSION + 1;
        store.record(&record).expect("record");
        assert!(matches!(
            store.get(&record.id),
            Err(CorralError::UnsupportedSchema { .. })
        ));
    }

    #[test]
    fn list_is_sorted_by_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(dir.path());
        let mut older = sample();
        older.name = None;
        older.created_at -= chrono::Duration::seconds(60);
        older.id = ContainerId::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let newer = sample();
        store.record(&newer).expect("newer");
        store.record(&older).expect("older");

        let ids: Vec<ContainerId> = store.list().expect("list").into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }
}
