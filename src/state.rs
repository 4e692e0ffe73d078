//! JSON state file
//!
//! Every managed resource's last observed attributes live in one JSON
//! document keyed by address. Each save rewrites the whole file through a
//! temporary sibling and a rename, so a crash never leaves a torn file.

use chrono::{DateTime, Utc};
use declarative::{Error, PriorState, ResourceAddress, StateBackend};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Current state file format
const STATE_VERSION: u32 = 1;

// ============================================================================
// State Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    /// Last time the file was written
    last_updated: DateTime<Utc>,
    #[serde(default)]
    resources: BTreeMap<ResourceAddress, PriorState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

// ============================================================================
// JsonFileBackend
// ============================================================================

/// [`StateBackend`] persisting to a single JSON file
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    file: Mutex<StateFile>,
}

impl JsonFileBackend {
    /// Use the file at `path`; it is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(StateFile::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the file was last written, if it exists
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        read_file(&self.path).ok().flatten().map(|f| f.last_updated)
    }

    fn lock(&self) -> MutexGuard<'_, StateFile> {
        match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self, file: &StateFile) -> declarative::Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| {
                Error::storage(format!("failed to create {}: {e}", dir.display()))
            })?;
        }

        let content = serde_json::to_string_pretty(file)
            .map_err(|e| Error::storage(format!("failed to serialize state: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .map_err(|e| Error::storage(format!("failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            Error::storage(format!("failed to replace {}: {e}", self.path.display()))
        })?;

        log::trace!("Saved state to {}", self.path.display());
        Ok(())
    }
}

impl StateBackend for JsonFileBackend {
    fn load(&self) -> declarative::Result<BTreeMap<ResourceAddress, PriorState>> {
        let loaded = read_file(&self.path)?.unwrap_or_default();
        if loaded.version > STATE_VERSION {
            return Err(Error::storage(format!(
                "{} was written by a newer version (format {})",
                self.path.display(),
                loaded.version
            )));
        }

        let resources = loaded.resources.clone();
        *self.lock() = loaded;
        log::debug!("Loaded {} state entries from {}", resources.len(), self.path.display());
        Ok(resources)
    }

    fn save(&self, address: &ResourceAddress, entry: Option<&PriorState>) -> declarative::Result<()> {
        let mut file = self.lock();
        match entry {
            Some(state) => file.resources.insert(address.clone(), state.clone()),
            None => file.resources.remove(address),
        };
        file.version = STATE_VERSION;
        file.last_updated = Utc::now();
        self.write(&file)
    }
}

/// `Ok(None)` when the file does not exist yet
fn read_file(path: &Path) -> declarative::Result<Option<StateFile>> {
    if !path.exists() {
        log::debug!("State file {} does not exist, starting empty", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::storage(format!("failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| Error::storage(format!("failed to parse {}: {e}", path.display())))
}
