use std::collections::BTreeMap;

use crate::models::report_models::{FavoriteEntry, FavoritesMap};

/// Dedupes each media source's favorites by value, keeping the latest `favoritedAt`.
///
/// Blank values and media sources left with no favorites are dropped. Entries come back
/// newest first, so normalizing twice gives the same map.
pub fn normalize_favorites(favorites: &FavoritesMap) -> FavoritesMap {
    let mut normalized = FavoritesMap::new();
    for (media_source, entries) in favorites {
        let media_source = media_source.trim();
        if media_source.is_empty() {
            continue;
        }
        let mut latest: BTreeMap<&str, i64> = BTreeMap::new();
        for entry in entries {
            let value = entry.value.trim();
            if value.is_empty() {
                continue;
            }
            let at = latest.entry(value).or_insert(entry.favorited_at);
            *at = (*at).max(entry.favorited_at);
        }
        if latest.is_empty() {
            continue;
        }
        let merged = normalized.entry(media_source.to_string()).or_default();
        for (value, favorited_at) in latest {
            match merged.iter_mut().find(|e| e.value == value) {
                Some(existing) => existing.favorited_at = existing.favorited_at.max(favorited_at),
                None => merged.push(FavoriteEntry { value: value.to_string(), favorited_at }),
            }
        }
        merged.sort_by(|a, b| b.favorited_at.cmp(&a.favorited_at).then_with(|| a.value.cmp(&b.value)));
    }
    normalized
}

/// Favorites as held by the attribution page. `dirty` is set by every local change and
/// cleared only once the server has accepted the map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FavoritesState {
    favorites: FavoritesMap,
    dirty: bool,
}

impl FavoritesState {
    pub fn new(favorites: &FavoritesMap) -> Self {
        FavoritesState { favorites: normalize_favorites(favorites), dirty: false }
    }

    pub fn favorites(&self) -> &FavoritesMap {
        &self.favorites
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_favorite(&self, media_source: &str, value: &str) -> bool {
        self.favorites
            .get(media_source)
            .is_some_and(|entries| entries.iter().any(|e| e.value == value))
    }

    /// Flips one favorite and returns whether it is now favorited.
    pub fn toggle(&mut self, media_source: &str, value: &str, now_ms: i64) -> bool {
        self.dirty = true;
        let entries = self.favorites.entry(media_source.to_string()).or_default();
        if let Some(pos) = entries.iter().position(|e| e.value == value) {
            entries.remove(pos);
            if entries.is_empty() {
                self.favorites.remove(media_source);
            }
            return false;
        }
        entries.insert(0, FavoriteEntry { value: value.to_string(), favorited_at: now_ms });
        true
    }

    /// Clears `dirty` when the server holds exactly the local map. A sync that raced with
    /// newer local changes leaves the state dirty.
    pub fn mark_synced(&mut self, stored: &FavoritesMap) {
        let stored = normalize_favorites(stored);
        if normalize_favorites(&self.favorites) == stored {
            self.favorites = stored;
            self.dirty = false;
        }
    }

    /// Replaces everything, e.g. after loading from the server or restoring a snapshot.
    pub fn replace(&mut self, favorites: &FavoritesMap, dirty: bool) {
        self.favorites = normalize_favorites(favorites);
        self.dirty = dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str, at: i64) -> FavoriteEntry {
        FavoriteEntry { value: value.into(), favorited_at: at }
    }

    #[test]
    fn normalization_keeps_latest_and_is_idempotent() {
        let mut raw = FavoritesMap::new();
        raw.insert("google".into(), vec![entry("seq-1", 10), entry("seq-2", 5), entry("seq-1", 30), entry(" ", 99)]);
        raw.insert("meta".into(), vec![entry("", 1)]);

        let once = normalize_favorites(&raw);
        assert_eq!(once.get("google").unwrap(), &vec![entry("seq-1", 30), entry("seq-2", 5)]);
        assert!(!once.contains_key("meta"));
        assert_eq!(normalize_favorites(&once), once);
    }

    #[test]
    fn toggling_marks_dirty_until_synced() {
        let mut state = FavoritesState::default();
        assert!(state.toggle("google", "seq-1", 100));
        assert!(state.is_dirty());
        assert!(state.is_favorite("google", "seq-1"));

        let stored = state.favorites().clone();
        state.mark_synced(&stored);
        assert!(!state.is_dirty());

        assert!(!state.toggle("google", "seq-1", 200));
        assert!(state.favorites().is_empty());
        assert!(state.is_dirty());
    }

    #[test]
    fn changes_during_sync_stay_dirty() {
        let mut state = FavoritesState::default();
        state.toggle("google", "seq-1", 100);
        let stored = state.favorites().clone();
        state.toggle("google", "seq-2", 150);
        state.mark_synced(&stored);
        assert!(state.is_dirty());
        assert!(state.is_favorite("google", "seq-2"));
    }
}
