//! Local Persistent Cache
//!
//! String-keyed storage that survives restarts. The core owns the
//! serialization; a cache only stores strings.
//!
//! Reads never fail: a missing or unreadable value is simply absent.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::game::state::{
    CurrentDraw, CustomSegment, DirectoryEntry, ParticipantId, ParticipantSets, StateStore,
};

pub mod memory;
pub mod file;

pub use memory::MemoryCache;
pub use file::FileCache;

/// Global key holding the last joined room code.
pub const ROOM_CODE_KEY: &str = "roomCode";

/// Global key holding this client's participant id.
pub const PARTICIPANT_KEY: &str = "participantId";

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backing file could not be written.
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be encoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Local key/value cache.
pub trait LocalCache: Send {
    /// Read a value. Absent on any failure.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&mut self, key: &str, value: String) -> Result<(), CacheError>;

    /// Make preceding writes durable.
    fn flush(&mut self) -> Result<(), CacheError> {
        Ok(())
    }
}

impl<T: LocalCache + ?Sized> LocalCache for Box<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), CacheError> {
        (**self).set(key, value)
    }

    fn flush(&mut self) -> Result<(), CacheError> {
        (**self).flush()
    }
}

/// Room-scoped cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    room: String,
}

impl CacheKeys {
    /// Keys for a room code.
    pub fn new(room: impl Into<String>) -> Self {
        Self { room: room.into() }
    }

    /// Custom pool segment.
    pub fn custom_items(&self) -> String {
        format!("customItems:{}", self.room)
    }

    /// Exclusion set.
    pub fn excluded(&self) -> String {
        format!("excluded:{}", self.room)
    }

    /// Claim map.
    pub fn claimed_by(&self) -> String {
        format!("claimedBy:{}", self.room)
    }

    /// Current draw and draw clock.
    pub fn current_draw(&self) -> String {
        format!("currentDraw:{}", self.room)
    }

    /// Participant directory.
    pub fn directory(&self) -> String {
        format!("directory:{}", self.room)
    }

    /// Local display name.
    pub fn player_name(&self) -> String {
        format!("playerName:{}", self.room)
    }
}

/// Cached form of the current draw register.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredDraw {
    #[serde(default)]
    current: Option<CurrentDraw>,
    #[serde(default)]
    clock: u64,
}

fn read_json<T: DeserializeOwned, C: LocalCache>(cache: &C, key: &str) -> Option<T> {
    let raw = cache.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unreadable cache entry {}: {}", key, e);
            None
        }
    }
}

/// Hydrate a store from the cached room. Returns whether anything was found.
pub fn load_room(cache: &impl LocalCache, room: &str, store: &mut StateStore) -> bool {
    let keys = CacheKeys::new(room);
    let mut board = false;
    let mut found = false;

    if let Some(mut custom) = read_json::<CustomSegment, _>(cache, &keys.custom_items()) {
        custom.normalize();
        store.custom = custom;
        board = true;
    }
    if let Some(draw) = read_json::<StoredDraw, _>(cache, &keys.current_draw()) {
        let stamp = draw.current.as_ref().map(|d| d.stamp).unwrap_or(0);
        store.draw_clock = draw.clock.max(stamp);
        store.current_draw = draw.current;
        board = true;
    }
    if let Some(exclusions) = read_json::<ParticipantSets, _>(cache, &keys.excluded()) {
        store.exclusions = exclusions;
        found = true;
    }
    if let Some(claims) = read_json::<ParticipantSets, _>(cache, &keys.claimed_by()) {
        store.claims = claims;
        found = true;
    }
    if let Some(directory) =
        read_json::<BTreeMap<ParticipantId, DirectoryEntry>, _>(cache, &keys.directory())
    {
        store.directory = directory;
        found = true;
    }

    if board {
        store.mark_history();
    }
    debug!("Hydrated room {} from cache: board {}, sets {}", room, board, found);
    board || found
}

/// Persist the shared fields of a store under the room's keys.
///
/// The board keys are written only once the store holds history, so a
/// reloaded peer never mistakes its empty pool for knowledge of the room.
pub fn save_room(cache: &mut impl LocalCache, room: &str, store: &StateStore) -> Result<(), CacheError> {
    let keys = CacheKeys::new(room);

    if store.has_history() {
        let draw = StoredDraw {
            current: store.current_draw.clone(),
            clock: store.draw_clock,
        };
        cache.set(&keys.custom_items(), serde_json::to_string(&store.custom)?)?;
        cache.set(&keys.current_draw(), serde_json::to_string(&draw)?)?;
    }
    cache.set(&keys.excluded(), serde_json::to_string(&store.exclusions)?)?;
    cache.set(&keys.claimed_by(), serde_json::to_string(&store.claims)?)?;
    cache.set(&keys.directory(), serde_json::to_string(&store.directory)?)?;
    cache.flush()
}

/// Cached display name for a room.
pub fn load_player_name(cache: &impl LocalCache, room: &str) -> Option<String> {
    cache.get(&CacheKeys::new(room).player_name()).filter(|n| !n.trim().is_empty())
}

/// Remember the display name used in a room.
pub fn save_player_name(cache: &mut impl LocalCache, room: &str, name: &str) -> Result<(), CacheError> {
    cache.set(&CacheKeys::new(room).player_name(), name.to_string())?;
    cache.flush()
}

/// Last joined room code.
pub fn last_room(cache: &impl LocalCache) -> Option<String> {
    cache.get(ROOM_CODE_KEY).filter(|r| !r.trim().is_empty())
}

/// Remember the last joined room code.
pub fn save_last_room(cache: &mut impl LocalCache, room: &str) -> Result<(), CacheError> {
    cache.set(ROOM_CODE_KEY, room.to_string())?;
    cache.flush()
}

/// This client's participant id, generated and stored on first use.
pub fn participant_id(cache: &mut impl LocalCache) -> ParticipantId {
    if let Some(id) = cache.get(PARTICIPANT_KEY).filter(|id| !id.trim().is_empty()) {
        return ParticipantId::new(id);
    }

    let id = ParticipantId::generate();
    let stored = cache
        .set(PARTICIPANT_KEY, id.as_str().to_string())
        .and_then(|_| cache.flush());
    if let Err(e) = stored {
        warn!("Participant id not cached, it will change next run: {}", e);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::game::catalog::{Catalog, Category};
    use crate::game::merge;
    use crate::game::state::{CustomEntry, ItemId};

    fn store() -> StateStore {
        let catalog = Catalog::new(vec![Category::new("Fixed", &["a", "b", "c"])]);
        StateStore::new(Arc::new(catalog))
    }

    #[test]
    fn test_keys_are_room_scoped() {
        let keys = CacheKeys::new("R1");
        assert_eq!(keys.custom_items(), "customItems:R1");
        assert_eq!(keys.excluded(), "excluded:R1");
        assert_eq!(keys.claimed_by(), "claimedBy:R1");
        assert_eq!(keys.current_draw(), "currentDraw:R1");
        assert_eq!(keys.directory(), "directory:R1");
        assert_eq!(keys.player_name(), "playerName:R1");
    }

    #[test]
    fn test_save_then_load_restores_shared_fields() {
        let alice = ParticipantId::new("alice");
        let mut original = store();
        merge::apply_roll(&mut original, 2, &alice, 4);
        merge::apply_add_custom_item(&mut original, CustomEntry {
            id: ItemId::new("q"),
            slot: 4,
            text: "Q1".to_string(),
        });
        merge::apply_set_name(&mut original, &alice, "Alice", 1);

        let mut cache = MemoryCache::new();
        save_room(&mut cache, "R1", &original).unwrap();

        let mut restored = store();
        assert!(load_room(&cache, "R1", &mut restored));
        assert!(restored.has_history());
        assert_eq!(restored.digest(), original.digest());
        assert_eq!(restored.draw_clock, 4);
    }

    #[test]
    fn test_exclusions_alone_do_not_restore_history() {
        let mut state = store();
        merge::apply_toggle_exclude(&mut state, 1, &ParticipantId::new("alice"), true);

        let mut cache = MemoryCache::new();
        save_room(&mut cache, "R1", &state).unwrap();
        assert_eq!(cache.get("customItems:R1"), None);

        let mut restored = store();
        assert!(load_room(&cache, "R1", &mut restored));
        assert!(!restored.has_history());
        assert!(restored.is_excluded_by(1, &ParticipantId::new("alice")));
    }

    #[test]
    fn test_load_missing_room_is_empty() {
        let cache = MemoryCache::new();
        let mut state = store();

        assert!(!load_room(&cache, "R1", &mut state));
        assert!(!state.has_history());
    }

    #[test]
    fn test_unreadable_entry_treated_as_absent() {
        let mut cache = MemoryCache::new();
        cache.set("excluded:R1", "{not json".to_string()).unwrap();
        cache.set("claimedBy:R1", r#"{"2":["alice"]}"#.to_string()).unwrap();

        let mut state = store();
        assert!(load_room(&cache, "R1", &mut state));
        assert!(state.exclusions.is_empty());
        assert_eq!(state.claimants(2), vec![&ParticipantId::new("alice")]);
    }

    #[test]
    fn test_rooms_do_not_share_entries() {
        let mut cache = MemoryCache::new();
        let mut state = store();
        merge::apply_roll(&mut state, 1, &ParticipantId::new("alice"), 1);
        save_room(&mut cache, "R1", &state).unwrap();

        let mut other = store();
        assert!(!load_room(&cache, "R2", &mut other));
    }

    #[test]
    fn test_participant_id_is_stable() {
        let mut cache = MemoryCache::new();
        let first = participant_id(&mut cache);
        assert_eq!(participant_id(&mut cache), first);
        assert_eq!(cache.get(PARTICIPANT_KEY), Some(first.as_str().to_string()));
    }

    #[test]
    fn test_last_room_and_player_name() {
        let mut cache = MemoryCache::new();
        assert_eq!(last_room(&cache), None);

        save_last_room(&mut cache, "R1").unwrap();
        save_player_name(&mut cache, "R1", "Ann").unwrap();

        assert_eq!(last_room(&cache), Some("R1".to_string()));
        assert_eq!(load_player_name(&cache, "R1"), Some("Ann".to_string()));
        assert_eq!(load_player_name(&cache, "R2"), None);
    }
}
