//! JSON-file persistence for user-defined poles.
//!
//! The whole list is stored as one JSON array. Reads that fail for any
//! reason yield an empty list; write failures are logged and the caller
//! keeps working with the in-memory result.

use crate::error::RegistryResult;
use lightwise_core::Pole;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Storage key, also the file stem.
pub const STORAGE_KEY: &str = "lightwise_poles_v1";

/// Pole list stored at `<data_dir>/lightwise_poles_v1.json`.
pub struct PoleStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl PoleStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{STORAGE_KEY}.json")),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all poles. Missing, unreadable or malformed files give an empty list.
    pub fn load(&self) -> Vec<Pole> {
        let _guard = self.lock.lock();
        self.read()
    }

    /// Replace the stored list.
    pub fn save(&self, poles: &[Pole]) -> RegistryResult<()> {
        let _guard = self.lock.lock();
        self.write(poles)
    }

    /// Insert a pole at the front of the list. Returns the updated list.
    pub fn add(&self, pole: Pole) -> Vec<Pole> {
        let _guard = self.lock.lock();
        let mut poles = self.read();
        poles.insert(0, pole);
        self.write_logged(&poles);
        poles
    }

    /// Remove the pole with `id`, if present. Returns the updated list.
    pub fn remove(&self, id: &str) -> Vec<Pole> {
        let _guard = self.lock.lock();
        let mut poles = self.read();
        let before = poles.len();
        poles.retain(|p| p.id != id);
        if poles.len() != before {
            self.write_logged(&poles);
        } else {
            debug!(id, "Pole not found, nothing removed");
        }
        poles
    }

    /// Attach a stream event to the pole with `pole_id`.
    ///
    /// Returns `false` without writing when no registered pole matches.
    pub fn record_event(&self, pole_id: &str, event: serde_json::Value) -> bool {
        let _guard = self.lock.lock();
        let mut poles = self.read();
        let Some(pole) = poles.iter_mut().find(|p| p.id == pole_id) else {
            return false;
        };
        pole.last_event = Some(event);
        self.write_logged(&poles);
        true
    }

    /// Remove every pole.
    pub fn clear(&self) {
        let _guard = self.lock.lock();
        self.write_logged(&[]);
    }

    fn read(&self) -> Vec<Pole> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), ?e, "Failed to read pole store");
                return Vec::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(poles) => poles,
            Err(e) => {
                warn!(path = %self.path.display(), ?e, "Failed to parse pole store");
                Vec::new()
            }
        }
    }

    fn write(&self, poles: &[Pole]) -> RegistryResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(poles)?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn write_logged(&self, poles: &[Pole]) {
        if let Err(e) = self.write(poles) {
            warn!(path = %self.path.display(), ?e, "Failed to write pole store");
        }
    }
}
