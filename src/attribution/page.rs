use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::favorites::FavoritesState;
use super::single_flight::SingleFlight;
use super::snapshot::{AttributionSnapshot, DataCache, QueryState, SelectedItems, SnapshotSlot, TablePagination};
use super::storage::StoreError;
use super::ttl_cache::{PutOutcome, TtlCache, DATA_CACHE_KEY, MAX_CACHE_BYTES, QUERY_STATE_KEY, SELECTED_ITEMS_KEY};
use crate::client::ClientError;
use crate::helper::csv_helpers::{attribution_table, write_csv};
use crate::helper::response_helpers::{PageRequest, MAX_PAGE_SIZE};
use crate::models::report_models::{
    AttributionQuery, AttributionRow, DateRange, FavoritesMap, FunnelDefinition, MAX_ATTRIBUTION_ROWS,
};

/// The server calls the attribution page depends on.
#[async_trait]
pub trait AttributionBackend: Send + Sync {
    async fn query_attribution(&self, query: &AttributionQuery) -> Result<Vec<AttributionRow>, ClientError>;
    async fn load_favorites(&self) -> Result<FavoritesMap, ClientError>;
    /// Replaces the user's favorites and returns what the server stored.
    async fn save_favorites(&self, favorites: &FavoritesMap) -> Result<FavoritesMap, ClientError>;
}

#[derive(Error, Debug)]
pub enum PageError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Saving favorites failed: {0}")]
    FavoritesSync(String),
    #[error("{0}")]
    InvalidFilter(String),
}

/// How `mount` brought the page back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// In-memory snapshot of the same user, no network call.
    Snapshot,
    /// Query state and data both came from the cache.
    Cached,
    /// Only the query state was cached, so the data was fetched again.
    Refetched,
    /// Only the data was cached. Rows are shown until the user applies a filter.
    DataOnly,
    /// Nothing to restore.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionFilter {
    pub date_range: DateRange,
    pub media_sources: Vec<String>,
    pub ad_sequences: Vec<String>,
}

type FavoritesSync = SingleFlight<Result<FavoritesMap, String>>;

/// Controller behind the AdjustData attribution page.
pub struct AdjustDataPage {
    backend: Arc<dyn AttributionBackend>,
    cache: TtlCache,
    slot: Arc<SnapshotSlot>,
    favorites_sync: Arc<FavoritesSync>,
    user_id: i64,
    data_source: String,
    date_range: Option<DateRange>,
    media_filter: Vec<String>,
    ad_sequence_filter: Vec<String>,
    selected: SelectedItems,
    favorites: FavoritesState,
    pagination: TablePagination,
    all_data: Vec<AttributionRow>,
}

impl AdjustDataPage {
    pub fn new(
        backend: Arc<dyn AttributionBackend>,
        cache: TtlCache,
        slot: Arc<SnapshotSlot>,
        user_id: i64,
        data_source: &str,
    ) -> Self {
        AdjustDataPage {
            backend,
            cache,
            slot,
            favorites_sync: Arc::new(SingleFlight::new()),
            user_id,
            data_source: data_source.to_string(),
            date_range: None,
            media_filter: Vec::new(),
            ad_sequence_filter: Vec::new(),
            selected: SelectedItems::default(),
            favorites: FavoritesState::default(),
            pagination: TablePagination::default(),
            all_data: Vec::new(),
        }
    }

    /// Shares one favorites sync between pages of the same client.
    pub fn with_favorites_sync(mut self, sync: Arc<FavoritesSync>) -> Self {
        self.favorites_sync = sync;
        self
    }

    pub async fn mount(&mut self) -> Result<MountOutcome, PageError> {
        if let Some(snapshot) = self.slot.take_for(self.user_id) {
            self.restore(snapshot);
            return Ok(MountOutcome::Snapshot);
        }

        let query_state: Option<QueryState> = self.cached(QUERY_STATE_KEY);
        if let Some(state) = &query_state {
            self.data_source = state.data_source.clone();
            self.date_range = Some(state.date_range.clone());
            self.media_filter = state.media_sources.clone();
            self.ad_sequence_filter = state.ad_sequences.clone();
            self.pagination = state.pagination;
        }
        let data = self
            .cached::<DataCache>(DATA_CACHE_KEY)
            .filter(|cached| query_state.is_none() || cached.data_source == self.data_source);
        if query_state.is_none() {
            if let Some(cached) = &data {
                self.data_source = cached.data_source.clone();
            }
        }
        self.selected = self.load_selected(&self.data_source);

        match self.backend.load_favorites().await {
            Ok(favorites) => self.favorites.replace(&favorites, false),
            Err(e) => log::warn!("Could not load attribution favorites: {}", e),
        }

        let outcome = match (query_state.is_some(), data) {
            (true, Some(cached)) => {
                self.all_data = cached.rows;
                MountOutcome::Cached
            }
            (true, None) => {
                self.fetch().await?;
                MountOutcome::Refetched
            }
            (false, Some(cached)) => {
                self.all_data = cached.rows;
                MountOutcome::DataOnly
            }
            (false, None) => MountOutcome::Empty,
        };
        self.clamp_page();
        log::debug!("Attribution page mounted: {:?}", outcome);
        Ok(outcome)
    }

    /// Syncs dirty favorites, then fetches the full filtered dataset. Returns the row count.
    pub async fn apply_filter(&mut self, filter: AttributionFilter) -> Result<usize, PageError> {
        if !filter.date_range.is_valid() {
            return Err(PageError::InvalidFilter("Start date must not be after end date.".to_string()));
        }
        if self.favorites.is_dirty() {
            self.sync_favorites().await?;
        }
        self.date_range = Some(filter.date_range);
        self.media_filter = filter.media_sources;
        self.ad_sequence_filter = filter.ad_sequences;
        self.pagination.page = 1;
        self.fetch().await
    }

    pub async fn sync_favorites(&mut self) -> Result<(), PageError> {
        let backend = self.backend.clone();
        let payload = self.favorites.favorites().clone();
        let result = self
            .favorites_sync
            .run(move || async move { backend.save_favorites(&payload).await.map_err(|e| e.to_string()) })
            .await;
        match result {
            Ok(stored) => {
                self.favorites.mark_synced(&stored);
                Ok(())
            }
            Err(message) => {
                log::warn!("Favorites sync failed: {}", message);
                Err(PageError::FavoritesSync(message))
            }
        }
    }

    async fn fetch(&mut self) -> Result<usize, PageError> {
        let Some(date_range) = self.date_range.clone() else {
            return Err(PageError::InvalidFilter("Pick a date range first.".to_string()));
        };
        let query = AttributionQuery {
            data_source: self.data_source.clone(),
            date_range,
            media_sources: self.media_filter.clone(),
            ad_sequences: self.ad_sequence_filter.clone(),
            events: self.selected.events.clone(),
            funnels: self.selected.funnels.clone(),
            limit: Some(MAX_ATTRIBUTION_ROWS),
        };
        self.all_data = self.backend.query_attribution(&query).await?;
        self.clamp_page();
        self.persist();
        Ok(self.all_data.len())
    }

    pub fn set_data_source(&mut self, data_source: &str) {
        if self.data_source == data_source {
            return;
        }
        self.data_source = data_source.to_string();
        self.selected = self.load_selected(data_source);
        self.all_data.clear();
        self.pagination.page = 1;
    }

    /// Stores the event and funnel picks for the current data source. They never expire.
    pub fn select_items(&mut self, events: Vec<String>, funnels: Vec<FunnelDefinition>) -> Result<(), PageError> {
        self.selected = SelectedItems { events, funnels };
        let mut all: BTreeMap<String, SelectedItems> = self.cached_plain(SELECTED_ITEMS_KEY).unwrap_or_default();
        all.insert(self.data_source.clone(), self.selected.clone());
        self.cache.write_plain(SELECTED_ITEMS_KEY, &all)?;
        Ok(())
    }

    pub fn toggle_favorite(&mut self, media_source: &str, ad_sequence: &str) -> bool {
        let now = self.cache.now();
        self.favorites.toggle(media_source, ad_sequence, now)
    }

    pub fn set_page(&mut self, page: u32) {
        self.pagination.page = page.max(1);
        self.clamp_page();
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.pagination.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self.clamp_page();
    }

    pub fn total_pages(&self) -> u32 {
        let size = self.pagination.page_size.max(1) as usize;
        (self.all_data.len().div_ceil(size)).max(1) as u32
    }

    /// Rows of the visible table page, sliced from the full dataset.
    pub fn current_page_rows(&self) -> &[AttributionRow] {
        PageRequest::new(Some(self.pagination.page), Some(self.pagination.page_size)).slice(&self.all_data)
    }

    /// Exports every fetched row, not only the visible page.
    pub fn export_csv(&self) -> Result<String, PageError> {
        let (header, rows) = attribution_table(&self.all_data, &self.selected.events, &self.selected.funnels);
        Ok(write_csv(&header, &rows)?)
    }

    /// Leaves the page, keeping its state in the snapshot slot for the next mount.
    pub fn unmount(self) {
        let snapshot = AttributionSnapshot {
            user_id: self.user_id,
            data_source: self.data_source,
            date_range: self.date_range,
            pagination: self.pagination,
            data: self.all_data,
            selected: self.selected,
            media_filter: self.media_filter,
            ad_sequence_filter: self.ad_sequence_filter,
            favorites: self.favorites.favorites().clone(),
            favorites_dirty: self.favorites.is_dirty(),
            captured_at: self.cache.now(),
        };
        self.slot.store(snapshot);
    }

    pub fn all_data(&self) -> &[AttributionRow] {
        &self.all_data
    }

    pub fn pagination(&self) -> TablePagination {
        self.pagination
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn date_range(&self) -> Option<&DateRange> {
        self.date_range.as_ref()
    }

    pub fn selected(&self) -> &SelectedItems {
        &self.selected
    }

    pub fn favorites(&self) -> &FavoritesState {
        &self.favorites
    }

    fn restore(&mut self, snapshot: AttributionSnapshot) {
        self.data_source = snapshot.data_source;
        self.date_range = snapshot.date_range;
        self.pagination = snapshot.pagination;
        self.all_data = snapshot.data;
        self.selected = snapshot.selected;
        self.media_filter = snapshot.media_filter;
        self.ad_sequence_filter = snapshot.ad_sequence_filter;
        self.favorites.replace(&snapshot.favorites, snapshot.favorites_dirty);
    }

    fn clamp_page(&mut self) {
        self.pagination.page = self.pagination.page.clamp(1, self.total_pages());
    }

    fn load_selected(&self, data_source: &str) -> SelectedItems {
        self.cached_plain::<BTreeMap<String, SelectedItems>>(SELECTED_ITEMS_KEY)
            .and_then(|mut all| all.remove(data_source))
            .unwrap_or_default()
    }

    // A cache that cannot be read is a miss.
    fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.read_fresh(key).unwrap_or_else(|e| {
            log::warn!("Reading '{}' failed: {}", key, e);
            None
        })
    }

    fn cached_plain<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.read_plain(key).unwrap_or_else(|e| {
            log::warn!("Reading '{}' failed: {}", key, e);
            None
        })
    }

    fn persist(&self) {
        let Some(date_range) = self.date_range.clone() else {
            return;
        };
        let state = QueryState {
            data_source: self.data_source.clone(),
            date_range,
            media_sources: self.media_filter.clone(),
            ad_sequences: self.ad_sequence_filter.clone(),
            pagination: self.pagination,
        };
        if let Err(e) = self.cache.write(QUERY_STATE_KEY, &state, None) {
            log::warn!("Could not persist attribution query state: {}", e);
        }
        let data = DataCache { data_source: self.data_source.clone(), rows: self.all_data.clone() };
        match self.cache.write(DATA_CACHE_KEY, &data, Some(MAX_CACHE_BYTES)) {
            Ok(PutOutcome::Stored) => {}
            Ok(PutOutcome::TooLarge { bytes }) => {
                log::info!("Attribution result of {} bytes is not cached", bytes)
            }
            Err(e) => log::warn!("Could not persist attribution data: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::storage::{KvStore, MemoryStore};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        rows: Vec<AttributionRow>,
        queries: AtomicUsize,
        fail_save: AtomicBool,
        saved: Mutex<Vec<FavoritesMap>>,
    }

    #[async_trait]
    impl AttributionBackend for FakeBackend {
        async fn query_attribution(&self, query: &AttributionQuery) -> Result<Vec<AttributionRow>, ClientError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            assert_eq!(query.limit, Some(MAX_ATTRIBUTION_ROWS));
            Ok(self.rows.clone())
        }

        async fn load_favorites(&self) -> Result<FavoritesMap, ClientError> {
            Ok(FavoritesMap::new())
        }

        async fn save_favorites(&self, favorites: &FavoritesMap) -> Result<FavoritesMap, ClientError> {
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(ClientError::Api { status: 500, message: "boom".into() });
            }
            self.saved.lock().unwrap().push(favorites.clone());
            Ok(favorites.clone())
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn rows(n: usize) -> Vec<AttributionRow> {
        (0..n)
            .map(|i| AttributionRow {
                date: day(1 + (i % 28) as u32),
                data_source: "adjust".into(),
                media_source: format!("media-{}", i % 3),
                ad_sequence: format!("seq-{}", i),
                events: BTreeMap::from([("install".to_string(), i as i64)]),
                revenue: i as f64,
                funnels: BTreeMap::new(),
            })
            .collect()
    }

    fn filter() -> AttributionFilter {
        AttributionFilter { date_range: DateRange { start_date: day(1), end_date: day(28) }, media_sources: vec![], ad_sequences: vec![] }
    }

    struct Fixture {
        backend: Arc<FakeBackend>,
        store: Arc<MemoryStore>,
        slot: Arc<SnapshotSlot>,
    }

    impl Fixture {
        fn new(row_count: usize) -> Self {
            Fixture {
                backend: Arc::new(FakeBackend { rows: rows(row_count), ..Default::default() }),
                store: Arc::new(MemoryStore::new()),
                slot: Arc::new(SnapshotSlot::new()),
            }
        }

        fn page(&self, user_id: i64) -> AdjustDataPage {
            AdjustDataPage::new(
                self.backend.clone(),
                TtlCache::new(self.store.clone()),
                self.slot.clone(),
                user_id,
                "adjust",
            )
        }

        fn queries(&self) -> usize {
            self.backend.queries.load(Ordering::SeqCst)
        }
    }

    #[actix_web::test]
    async fn cached_state_restores_without_fetching() {
        let fx = Fixture::new(12);
        let mut page = fx.page(1);
        assert_eq!(page.mount().await.unwrap(), MountOutcome::Empty);
        assert_eq!(page.apply_filter(filter()).await.unwrap(), 12);
        assert_eq!(fx.queries(), 1);
        drop(page);

        let mut again = fx.page(1);
        assert_eq!(again.mount().await.unwrap(), MountOutcome::Cached);
        assert_eq!(again.all_data().len(), 12);
        assert_eq!(fx.queries(), 1);
    }

    #[actix_web::test]
    async fn snapshot_belongs_to_one_user() {
        let fx = Fixture::new(5);
        let mut page = fx.page(1);
        page.mount().await.unwrap();
        page.apply_filter(filter()).await.unwrap();
        page.unmount();

        let mut same_user = fx.page(1);
        assert_eq!(same_user.mount().await.unwrap(), MountOutcome::Snapshot);
        assert_eq!(same_user.all_data().len(), 5);
        same_user.unmount();

        fx.store.remove(DATA_CACHE_KEY).unwrap();
        let mut other_user = fx.page(2);
        assert_eq!(other_user.mount().await.unwrap(), MountOutcome::Refetched);
        assert!(fx.slot.is_empty());
        assert_eq!(fx.queries(), 2);
    }

    #[actix_web::test]
    async fn data_without_query_state_waits_for_user() {
        let fx = Fixture::new(3);
        let mut page = fx.page(1);
        page.mount().await.unwrap();
        page.apply_filter(filter()).await.unwrap();
        fx.store.remove(QUERY_STATE_KEY).unwrap();

        let mut again = fx.page(1);
        assert_eq!(again.mount().await.unwrap(), MountOutcome::DataOnly);
        assert_eq!(again.all_data().len(), 3);
        assert_eq!(fx.queries(), 1);
    }

    #[actix_web::test]
    async fn failed_favorites_sync_aborts_the_filter() {
        let fx = Fixture::new(3);
        let mut page = fx.page(1);
        page.mount().await.unwrap();
        page.toggle_favorite("media-0", "seq-0");
        fx.backend.fail_save.store(true, Ordering::SeqCst);

        assert!(matches!(page.apply_filter(filter()).await, Err(PageError::FavoritesSync(_))));
        assert!(page.favorites().is_dirty());
        assert_eq!(fx.queries(), 0);

        fx.backend.fail_save.store(false, Ordering::SeqCst);
        page.apply_filter(filter()).await.unwrap();
        assert!(!page.favorites().is_dirty());
        assert_eq!(fx.backend.saved.lock().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn pages_are_sliced_from_the_full_dataset() {
        let fx = Fixture::new(25);
        let mut page = fx.page(1);
        page.mount().await.unwrap();
        page.apply_filter(filter()).await.unwrap();

        page.set_page(3);
        assert_eq!(page.current_page_rows().len(), 5);
        page.set_page(9);
        assert_eq!(page.pagination().page, 3);
        page.set_page_size(20);
        assert_eq!(page.pagination().page, 2);
        assert_eq!(page.current_page_rows().len(), 5);
    }

    #[actix_web::test]
    async fn export_covers_all_rows_and_selected_columns() {
        let fx = Fixture::new(15);
        let mut page = fx.page(1);
        page.mount().await.unwrap();
        page.select_items(vec!["install".into()], vec![]).unwrap();
        page.apply_filter(filter()).await.unwrap();

        let csv_text = page.export_csv().unwrap();
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        assert_eq!(reader.headers().unwrap().len(), 6);
        assert_eq!(reader.records().count(), 15);

        let reopened = fx.page(1);
        assert_eq!(reopened.load_selected("adjust").events, vec!["install".to_string()]);
    }
}
