use std::collections::BTreeMap;

use chrono::Utc;
use ember_files::FileLocation;
use tracing::debug;

use crate::types::{DeploymentError, FutureStatus};

/// One executed (or attempted) future, keyed by future id within a
/// network-scoped journal. Terminal entries are never deleted during
/// normal execution - they are the audit trail the idempotent re-run
/// guarantee rests on.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JournalEntry {
    pub future_id: String,
    pub status: FutureStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub updated_at: String,
}

impl JournalEntry {
    pub fn new(
        future_id: &str,
        status: FutureStatus,
        tx_hash: Option<String>,
        result: Option<String>,
    ) -> JournalEntry {
        JournalEntry {
            future_id: future_id.to_string(),
            status,
            tx_hash,
            result,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentJournalFile {
    pub network: String,
    pub entries: Vec<JournalEntry>,
}

/// Durable, append/overwrite-by-key record of executed futures for one
/// network. Persisted as YAML so operators can inspect and diff it.
/// Writers are exclusive per network (lock file); read-only opens are
/// unrestricted.
#[derive(Debug)]
pub struct DeploymentJournal {
    pub network: String,
    location: Option<FileLocation>,
    lock_location: Option<FileLocation>,
    entries: BTreeMap<String, JournalEntry>,
}

impl DeploymentJournal {
    pub fn open(location: FileLocation, network: &str) -> Result<DeploymentJournal, DeploymentError> {
        let lock_location = DeploymentJournal::acquire_lock(&location, network)?;
        let entries = DeploymentJournal::load_entries(&location, network)?;
        Ok(DeploymentJournal {
            network: network.to_string(),
            location: Some(location),
            lock_location: Some(lock_location),
            entries,
        })
    }

    /// Loads the journal without taking the writer lock. Any call that
    /// would persist fails on a read-only journal.
    pub fn open_read_only(
        location: FileLocation,
        network: &str,
    ) -> Result<DeploymentJournal, DeploymentError> {
        let entries = DeploymentJournal::load_entries(&location, network)?;
        Ok(DeploymentJournal {
            network: network.to_string(),
            location: None,
            lock_location: None,
            entries,
        })
    }

    /// Journal with no backing file. Used by tests and dry runs; the
    /// idempotence guarantee only spans one process lifetime.
    pub fn in_memory(network: &str) -> DeploymentJournal {
        DeploymentJournal {
            network: network.to_string(),
            location: None,
            lock_location: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, future_id: &str) -> Option<&JournalEntry> {
        self.entries.get(future_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.values()
    }

    pub fn record(&mut self, entry: JournalEntry) -> Result<(), DeploymentError> {
        debug!(
            future_id = %entry.future_id,
            status = ?entry.status,
            network = %self.network,
            "journal record"
        );
        self.entries.insert(entry.future_id.clone(), entry);
        self.persist()
    }

    /// Correction operation: forgets one future so the next run
    /// re-executes it. Intentionally not reachable from the execution
    /// engine - redeploying live infrastructure is an operator decision.
    pub fn reset(&mut self, future_id: &str) -> Result<(), DeploymentError> {
        self.entries.remove(future_id);
        self.persist()
    }

    fn load_entries(
        location: &FileLocation,
        network: &str,
    ) -> Result<BTreeMap<String, JournalEntry>, DeploymentError> {
        let mut entries = BTreeMap::new();
        if location.exists() {
            let content = location.read_content().map_err(DeploymentError::Journal)?;
            let journal_file: DeploymentJournalFile = serde_yaml::from_slice(&content[..])
                .map_err(|e| {
                    DeploymentError::Journal(format!(
                        "unable to read journal {}\n{}",
                        location, e
                    ))
                })?;
            if journal_file.network != network {
                return Err(DeploymentError::Journal(format!(
                    "journal {} is scoped to network '{}', not '{}'",
                    location, journal_file.network, network
                )));
            }
            for entry in journal_file.entries.into_iter() {
                entries.insert(entry.future_id.clone(), entry);
            }
        }
        Ok(entries)
    }

    fn acquire_lock(
        location: &FileLocation,
        network: &str,
    ) -> Result<FileLocation, DeploymentError> {
        let mut lock_path = location.expect_path_buf();
        let file_name = location.get_file_name().unwrap_or_default();
        lock_path.set_file_name(format!("{}.lock", file_name));
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DeploymentError::Journal(format!("unable to create journal directory\n{}", e))
            })?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => Ok(FileLocation::from_path(lock_path)),
            Err(_) => Err(DeploymentError::Journal(format!(
                "journal for network '{}' is locked by another deployment - if no deployment is running, remove the stale lock file {}",
                network,
                lock_path.display()
            ))),
        }
    }

    fn persist(&self) -> Result<(), DeploymentError> {
        let location = match &self.location {
            Some(location) => location,
            None => return Ok(()),
        };
        let journal_file = DeploymentJournalFile {
            network: self.network.clone(),
            entries: self.entries.values().cloned().collect(),
        };
        let content = serde_yaml::to_string(&journal_file).map_err(|e| {
            DeploymentError::Journal(format!("unable to serialize journal\n{}", e))
        })?;

        // Whole-file rewrite through a sibling temp file + rename, so a
        // crash mid-write never truncates the journal.
        let final_path = location.expect_path_buf();
        let mut tmp_path = final_path.clone();
        let file_name = location.get_file_name().unwrap_or_default();
        tmp_path.set_file_name(format!("{}.tmp", file_name));
        let tmp_location = FileLocation::from_path(tmp_path.clone());
        tmp_location
            .write_content(content.as_bytes())
            .map_err(DeploymentError::Journal)?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| {
            DeploymentError::Journal(format!(
                "unable to persist journal {}\n{}",
                final_path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

impl Drop for DeploymentJournal {
    fn drop(&mut self) {
        if let Some(lock_location) = &self.lock_location {
            let _ = std::fs::remove_file(lock_location.expect_path_buf());
        }
    }
}
