//! Project store, a small JSON document persisted on local disk.
//!
//! Holds the list of projects rooms may track, the message templates for both
//! webhook formats, and each room's tracked projects. The whole document is
//! rewritten on every change (temp file + rename); it is tiny and changes only
//! when someone runs a tracking command.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use herald_common::error::AppError;
use herald_common::types::{AlertFormat, RoomId};

/// Template for version 1 alerts.
pub const DEFAULT_V1_TEMPLATE: &str = "[{{ labels.severity }}] {{ summary }}: {{ description }}";

/// Template for version 2+ alerts.
pub const DEFAULT_V2_TEMPLATE: &str =
    "[{{ status }}] {{ labels.alertname }}: {{ annotations.summary }}";

fn default_v1_template() -> String {
    DEFAULT_V1_TEMPLATE.to_string()
}

fn default_v2_template() -> String {
    DEFAULT_V2_TEMPLATE.to_string()
}

/// On-disk document layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    /// Projects that rooms are allowed to track
    #[serde(default)]
    pub known_projects: Vec<String>,
    #[serde(default = "default_v1_template")]
    pub v1_message_template: String,
    #[serde(default = "default_v2_template")]
    pub v2_message_template: String,
    /// Tracked projects per room
    #[serde(default)]
    pub rooms: BTreeMap<RoomId, Vec<String>>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            known_projects: Vec::new(),
            v1_message_template: default_v1_template(),
            v2_message_template: default_v2_template(),
            rooms: BTreeMap::new(),
        }
    }
}

/// Thread-safe project store, optionally backed by a file.
#[derive(Debug)]
pub struct ProjectStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
}

impl ProjectStore {
    /// Open the store at `path`. A missing file yields the defaults; the file is
    /// created on the first change.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Store file not found, starting empty");
                StoreData::default()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            known_projects = data.known_projects.len(),
            rooms = data.rooms.len(),
            "Project store loaded"
        );

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Store that lives only in memory.
    pub fn in_memory(data: StoreData) -> Self {
        Self {
            path: None,
            data: RwLock::new(data),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> StoreData {
        self.data.read().clone()
    }

    pub fn known_projects(&self) -> Vec<String> {
        self.data.read().known_projects.clone()
    }

    pub fn is_known(&self, project: &str) -> bool {
        self.data.read().known_projects.iter().any(|p| p == project)
    }

    pub fn template(&self, format: AlertFormat) -> String {
        let data = self.data.read();
        match format {
            AlertFormat::V1 => data.v1_message_template.clone(),
            AlertFormat::V2 => data.v2_message_template.clone(),
        }
    }

    /// Apply `change` and persist the result.
    ///
    /// The change is made on a copy; if writing the file fails the in-memory
    /// document is left as it was.
    ///
    /// Blocks on file I/O while holding the write lock. Async callers should
    /// run it through `tokio::task::spawn_blocking`.
    pub fn update<R>(&self, change: impl FnOnce(&mut StoreData) -> R) -> Result<R, AppError> {
        let mut data = self.data.write();
        let mut next = data.clone();
        let result = change(&mut next);

        if next != *data {
            if let Some(path) = &self.path {
                write_atomically(path, &next)?;
            }
            *data = next;
        }

        Ok(result)
    }
}

fn write_atomically(path: &Path, data: &StoreData) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(data)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), "Project store saved");
    Ok(())
}
