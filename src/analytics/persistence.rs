//! Durable copies of published snapshots
//!
//! Each view persists as `(view name, grain key) -> (row, computed_at)`,
//! plus one metadata entry per view holding its `computed_at` and the
//! bookkeeping the next incremental pass needs.

use crate::analytics::error::{AnalyticsError, AnalyticsResult};
use crate::analytics::views::{PassWatermark, ViewData, ViewName, ViewSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Storage for published view snapshots
pub trait SnapshotRepository: Send + Sync {
    /// Replace the persisted copy of a view
    fn save(&self, snapshot: &ViewSnapshot) -> AnalyticsResult<()>;

    /// Load the persisted copy of a view, if a complete one exists
    fn load(&self, view: ViewName) -> AnalyticsResult<Option<ViewSnapshot>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRow {
    computed_at: DateTime<Utc>,
    measures: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    computed_at: DateTime<Utc>,
    rows: usize,
    watermark: PassWatermark,
}

/// Sled-backed snapshot repository
pub struct SledSnapshotRepository {
    db: Arc<Db>,
    rows: Tree,
    meta: Tree,
}

impl SledSnapshotRepository {
    pub fn new<P: AsRef<Path>>(path: P) -> AnalyticsResult<Self> {
        let db = sled::open(path).map_err(storage_error)?;
        let rows = db.open_tree("view_rows").map_err(storage_error)?;
        let meta = db.open_tree("view_meta").map_err(storage_error)?;

        Ok(Self {
            db: Arc::new(db),
            rows,
            meta,
        })
    }

    pub fn flush(&self) -> AnalyticsResult<()> {
        self.db.flush().map_err(storage_error)?;
        Ok(())
    }
}

fn prefix(view: ViewName) -> Vec<u8> {
    let mut key = view.to_string().into_bytes();
    key.push(0);
    key
}

fn storage_error(e: sled::Error) -> AnalyticsError {
    AnalyticsError::SourceUnavailable(format!("snapshot store: {}", e))
}

fn encoding_error(view: ViewName, e: serde_json::Error) -> AnalyticsError {
    AnalyticsError::ComputeFailed {
        view,
        reason: format!("snapshot encoding: {}", e),
    }
}

impl SnapshotRepository for SledSnapshotRepository {
    fn save(&self, snapshot: &ViewSnapshot) -> AnalyticsResult<()> {
        let view = snapshot.view;
        let prefix = prefix(view);
        let mut batch = Batch::default();

        for entry in self.rows.scan_prefix(&prefix).keys() {
            batch.remove(entry.map_err(storage_error)?);
        }

        let rows = snapshot
            .data
            .grain_rows()
            .map_err(|e| encoding_error(view, e))?;
        let count = rows.len();
        for (grain, measures) in rows {
            let mut key = prefix.clone();
            key.extend_from_slice(grain.as_bytes());
            let value = serde_json::to_vec(&PersistedRow {
                computed_at: snapshot.computed_at,
                measures,
            })
            .map_err(|e| encoding_error(view, e))?;
            batch.insert(key, value);
        }
        self.rows.apply_batch(batch).map_err(storage_error)?;

        // written last; a load only trusts rows that agree with it
        let meta = serde_json::to_vec(&SnapshotMeta {
            computed_at: snapshot.computed_at,
            rows: count,
            watermark: snapshot.watermark.clone(),
        })
        .map_err(|e| encoding_error(view, e))?;
        self.meta
            .insert(view.to_string().as_bytes(), meta)
            .map_err(storage_error)?;

        debug!(view = %view, rows = count, "Persisted view snapshot");
        Ok(())
    }

    fn load(&self, view: ViewName) -> AnalyticsResult<Option<ViewSnapshot>> {
        let Some(meta) = self
            .meta
            .get(view.to_string().as_bytes())
            .map_err(storage_error)?
        else {
            return Ok(None);
        };
        let meta: SnapshotMeta =
            serde_json::from_slice(&meta).map_err(|e| encoding_error(view, e))?;

        let mut measures = Vec::with_capacity(meta.rows);
        for entry in self.rows.scan_prefix(prefix(view)).values() {
            let row: PersistedRow = serde_json::from_slice(&entry.map_err(storage_error)?)
                .map_err(|e| encoding_error(view, e))?;
            if row.computed_at != meta.computed_at {
                return Ok(None);
            }
            measures.push(row.measures);
        }
        if measures.len() != meta.rows {
            return Ok(None);
        }

        let data =
            ViewData::from_grain_rows(view, measures).map_err(|e| encoding_error(view, e))?;
        Ok(Some(ViewSnapshot::new(meta.computed_at, data, meta.watermark)))
    }
}
