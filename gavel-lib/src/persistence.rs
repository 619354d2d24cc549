//! Snapshot persistence for cache and escalation state.
//!
//! A snapshot stores absolute expiry instants. On restore, the remaining lifetime of each
//! entry is re-derived against the current clock and entries that expired while the
//! process was down are dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GavelError, Result};
use crate::escalation::EscalationRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at_ms: u64,
    /// Named caches, keyed by cache name
    #[serde(default)]
    pub caches: BTreeMap<String, Vec<SnapshotEntry>>,
    #[serde(default)]
    pub escalations: Vec<EscalationRecord>,
}

impl Snapshot {
    pub fn entry_count(&self) -> usize {
        self.caches.values().map(Vec::len).sum::<usize>() + self.escalations.len()
    }
}

/// What a restore kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub restored: usize,
    pub expired: usize,
}

/// JSON snapshot file written with temp-file-then-rename.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `snapshot`, replacing any previous file.
    ///
    /// Readers never observe a partially written file.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &data).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), bytes = data.len(), "Snapshot written");
        Ok(())
    }

    /// Read the snapshot. A missing file is not an error.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data).map(Some).map_err(|e| {
            GavelError::Snapshot(format!("Corrupt snapshot {}: {e}", self.path.display()))
        })
    }
}
