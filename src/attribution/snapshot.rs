use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

use crate::helper::response_helpers::DEFAULT_PAGE_SIZE;
use crate::models::report_models::{AttributionRow, DateRange, FavoritesMap, FunnelDefinition};

/// Table page of the attribution grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for TablePagination {
    fn default() -> Self {
        TablePagination { page: 1, page_size: DEFAULT_PAGE_SIZE }
    }
}

/// Events and funnels picked for one data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedItems {
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub funnels: Vec<FunnelDefinition>,
}

/// What the page persists under the query state key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub data_source: String,
    pub date_range: DateRange,
    #[serde(default)]
    pub media_sources: Vec<String>,
    #[serde(default)]
    pub ad_sequences: Vec<String>,
    #[serde(default)]
    pub pagination: TablePagination,
}

/// What the page persists under the data cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCache {
    pub data_source: String,
    pub rows: Vec<AttributionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionSnapshot {
    pub user_id: i64,
    pub data_source: String,
    pub date_range: Option<DateRange>,
    pub pagination: TablePagination,
    pub data: Vec<AttributionRow>,
    pub selected: SelectedItems,
    pub media_filter: Vec<String>,
    pub ad_sequence_filter: Vec<String>,
    pub favorites: FavoritesMap,
    pub favorites_dirty: bool,
    pub captured_at: i64,
}

/// Holds the last unmounted page's state for the lifetime of the client.
#[derive(Debug, Default)]
pub struct SnapshotSlot {
    inner: Mutex<Option<AttributionSnapshot>>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        SnapshotSlot::default()
    }

    pub fn store(&self, snapshot: AttributionSnapshot) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Empties the slot. The snapshot comes back only when it belongs to `user_id`.
    pub fn take_for(&self, user_id: i64) -> Option<AttributionSnapshot> {
        let taken = self.inner.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        if taken.user_id == user_id {
            Some(taken)
        } else {
            log::debug!("Discarding attribution snapshot of user {}", taken.user_id);
            None
        }
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}
