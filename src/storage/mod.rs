//! Watermark persistence
//!
//! The exporter keeps a single durable value: the timestamp after which
//! events have not yet been exported. It lives in an embedded `sled`
//! database under the key [`WATERMARK_KEY`].

use crate::conversion::timestamp::{parse_timestamp, render_watermark};
use crate::error::{ExportError, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use sled::Db;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Storage key of the watermark.
pub const WATERMARK_KEY: &str = "last_invoked_at";

/// Durable key-value storage for the watermark.
pub trait WatermarkStore: Send + Sync {
    /// Reads the raw persisted watermark, if any.
    fn get(&self) -> Result<Option<String>>;

    /// Persists the raw watermark.
    fn set(&self, value: &str) -> Result<()>;
}

/// Watermark store backed by `sled`.
pub struct SledWatermarkStore {
    db: Db,
}

impl SledWatermarkStore {
    /// Opens or creates the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Storage` if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```
    /// use gclid_export::storage::{SledWatermarkStore, WatermarkStore};
    ///
    /// # fn main() -> gclid_export::error::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let store = SledWatermarkStore::open(dir.path().join("state"))?;
    /// assert!(store.get()?.is_none());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for state")
                .map_err(|e| ExportError::Storage(e.to_string()))?;
        }

        let db = sled::open(path)
            .map_err(|e| ExportError::Storage(format!("Failed to open database: {}", e)))?;
        debug!(path = %path.display(), "Opened watermark store");
        Ok(Self { db })
    }
}

impl WatermarkStore for SledWatermarkStore {
    fn get(&self) -> Result<Option<String>> {
        match self
            .db
            .get(WATERMARK_KEY)
            .map_err(|e| ExportError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ExportError::InvalidWatermark(format!("stored value is not UTF-8: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, value: &str) -> Result<()> {
        self.db
            .insert(WATERMARK_KEY, value.as_bytes())
            .map_err(|e| ExportError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| ExportError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}

/// In-process watermark store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Option<String>>,
}

impl MemoryWatermarkStore {
    /// Creates a store already holding `value`.
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn get(&self) -> Result<Option<String>> {
        let guard = self
            .value
            .lock()
            .map_err(|_| ExportError::Storage("watermark lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn set(&self, value: &str) -> Result<()> {
        let mut guard = self
            .value
            .lock()
            .map_err(|_| ExportError::Storage("watermark lock poisoned".to_string()))?;
        *guard = Some(value.to_string());
        Ok(())
    }
}

/// Default state directory (`<data dir>/gclid-export/state`).
///
/// # Errors
///
/// Returns `ExportError::Storage` when no home directory can be determined.
pub fn default_state_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "posthog", "gclid-export")
        .ok_or_else(|| ExportError::Storage("Could not determine data directory".into()))?;
    Ok(proj_dirs.data_dir().join("state"))
}

/// Seeds the watermark on first start.
///
/// An existing watermark is kept untouched. Otherwise the configured
/// initial value is stored, or the current time when none is given.
///
/// # Errors
///
/// Returns `ExportError::InvalidWatermark` if the initial value or the
/// existing value cannot be parsed.
pub fn bootstrap_watermark(
    store: &dyn WatermarkStore,
    initial: Option<&str>,
) -> Result<DateTime<Utc>> {
    if store.get()?.is_some() {
        let existing = load_watermark(store)?;
        if initial.is_some() {
            debug!(
                watermark = %render_watermark(existing),
                "Watermark already present; ignoring initial value"
            );
        }
        return Ok(existing);
    }

    let seed = match initial {
        Some(raw) => parse_timestamp(raw).ok_or_else(|| {
            ExportError::InvalidWatermark(format!("initial watermark '{}' is not a date", raw))
        })?,
        None => Utc::now(),
    };

    store.set(&render_watermark(seed))?;
    info!(watermark = %render_watermark(seed), "Seeded watermark");
    Ok(seed)
}

/// Loads and parses the persisted watermark.
///
/// # Errors
///
/// Returns `ExportError::MissingWatermark` if none has been stored and
/// `ExportError::InvalidWatermark` if the stored value is not a date.
pub fn load_watermark(store: &dyn WatermarkStore) -> Result<DateTime<Utc>> {
    let raw = store.get()?.ok_or(ExportError::MissingWatermark)?;
    let parsed = parse_timestamp(&raw).ok_or_else(|| {
        ExportError::InvalidWatermark(format!("stored watermark '{}' is not a date", raw))
    })?;
    Ok(parsed)
}

/// Moves the watermark forward to `to`.
///
/// The watermark never moves backwards: when the stored value is already
/// later than `to` it is kept. Returns the value in effect afterwards.
///
/// # Errors
///
/// Propagates storage errors.
pub fn advance_watermark(store: &dyn WatermarkStore, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(current) = load_watermark(store) {
        if current > to {
            warn!(
                current = %render_watermark(current),
                requested = %render_watermark(to),
                "Refusing to move watermark backwards"
            );
            return Ok(current);
        }
    }

    store.set(&render_watermark(to))?;
    Ok(to)
}

/// Overwrites the watermark unconditionally (operator override).
///
/// # Errors
///
/// Returns `ExportError::InvalidWatermark` if `raw` is not a date.
pub fn set_watermark(store: &dyn WatermarkStore, raw: &str) -> Result<DateTime<Utc>> {
    let parsed = parse_timestamp(raw)
        .ok_or_else(|| ExportError::InvalidWatermark(format!("'{}' is not a date", raw)))?;
    store.set(&render_watermark(parsed))?;
    Ok(parsed)
}
