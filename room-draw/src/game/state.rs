//! Session State Definitions
//!
//! All state types for a shared draw room.
//! Uses BTreeMap/BTreeSet so iteration order (and therefore the state
//! digest) is identical on every peer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};
use crate::game::catalog::Catalog;

/// 1-based position of an item in the concatenated pool.
pub type Ordinal = u32;

/// Category label given to custom items.
pub const CUSTOM_CATEGORY: &str = "Custom";

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Locally generated participant identifier.
///
/// Self-asserted and not checked for uniqueness. Claims and exclusions key
/// on this, never on the display name, so a rename does not change merge
/// identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a custom item, assigned by its author.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// POOL
// =============================================================================

/// An entry in the pool as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Stable ordinal.
    pub ordinal: Ordinal,
    /// Display text.
    pub text: String,
    /// Category label.
    pub category: String,
    /// Whether a participant added this item.
    pub custom: bool,
}

/// A custom item as replicated between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEntry {
    /// Author-assigned identifier.
    pub id: ItemId,
    /// Ordinal the author assigned when adding.
    pub slot: Ordinal,
    /// Display text.
    pub text: String,
}

/// The custom segment of the pool.
///
/// Entries are only ever added; removal records the item id as a tombstone.
/// Ordinals are the rank in `(slot, id)` order offset by the fixed count,
/// tombstones included, so a removed ordinal is never handed out again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSegment {
    /// Entries sorted by `(slot, id)`, unique by id.
    #[serde(default)]
    entries: Vec<CustomEntry>,
    /// Removed item ids.
    #[serde(default)]
    removed: BTreeSet<ItemId>,
}

impl CustomSegment {
    /// Restore sort order and id uniqueness after deserialization.
    pub fn normalize(&mut self) {
        self.entries.sort_by(|a, b| (a.slot, &a.id).cmp(&(b.slot, &b.id)));
        self.entries.dedup_by(|a, b| a.id == b.id);
    }

    /// Insert an entry. Returns false if the id is already known.
    pub fn insert(&mut self, entry: CustomEntry) -> bool {
        if self.entries.iter().any(|e| e.id == entry.id) {
            return false;
        }
        let key = (entry.slot, entry.id.clone());
        let pos = self.entries
            .iter()
            .position(|e| (e.slot, &e.id) > (key.0, &key.1))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
        true
    }

    /// Tombstone an item id. Returns false if it was already removed.
    pub fn remove(&mut self, id: &ItemId) -> bool {
        self.removed.insert(id.clone())
    }

    /// Union another segment's entries and tombstones into this one.
    pub fn merge(&mut self, other: CustomSegment) -> bool {
        let mut changed = false;
        for entry in other.entries {
            changed |= self.insert(entry);
        }
        for id in other.removed {
            changed |= self.remove(&id);
        }
        changed
    }

    /// Whether the id has been removed.
    pub fn is_removed(&self, id: &ItemId) -> bool {
        self.removed.contains(id)
    }

    /// Slot to assign to the next locally added item.
    pub fn next_slot(&self, fixed_count: usize) -> Ordinal {
        let by_len = (fixed_count + self.entries.len() + 1) as Ordinal;
        let by_max = self.entries.last().map(|e| e.slot + 1).unwrap_or(0);
        by_len.max(by_max)
    }

    /// Entry occupying an ordinal (live or removed).
    pub fn entry_at(&self, ordinal: Ordinal, fixed_count: usize) -> Option<&CustomEntry> {
        let index = (ordinal as usize).checked_sub(fixed_count + 1)?;
        self.entries.get(index)
    }

    /// Ordinal of an item id.
    pub fn ordinal_of(&self, id: &ItemId, fixed_count: usize) -> Option<Ordinal> {
        self.entries
            .iter()
            .position(|e| &e.id == id)
            .map(|i| (fixed_count + 1 + i) as Ordinal)
    }

    /// Live entries with their ordinals.
    pub fn live(&self, fixed_count: usize) -> impl Iterator<Item = (Ordinal, &CustomEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !self.removed.contains(&e.id))
            .map(move |(i, e)| ((fixed_count + 1 + i) as Ordinal, e))
    }

    /// Number of live entries.
    pub fn live_len(&self) -> usize {
        self.entries.iter().filter(|e| !self.removed.contains(&e.id)).count()
    }

    /// All entries, including removed ones.
    pub fn entries(&self) -> &[CustomEntry] {
        &self.entries
    }

    /// Removed ids.
    pub fn removed(&self) -> &BTreeSet<ItemId> {
        &self.removed
    }

    /// Whether nothing was ever added or removed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.removed.is_empty()
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

/// The most recently settled draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentDraw {
    /// Settled ordinal.
    pub ordinal: Ordinal,
    /// Draw stamp; higher stamps win.
    pub stamp: u64,
    /// Who drew it; breaks stamp ties.
    pub by: ParticipantId,
}

impl CurrentDraw {
    /// Whether this draw should replace `other` in the register.
    pub fn supersedes(&self, other: &CurrentDraw) -> bool {
        (self.stamp, &self.by, self.ordinal) > (other.stamp, &other.by, other.ordinal)
    }
}

/// Directory entry for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Display name.
    pub name: String,
    /// Rename revision; the higher revision wins.
    #[serde(default)]
    pub rev: u64,
}

impl DirectoryEntry {
    /// Whether this entry should replace `other`.
    pub fn supersedes(&self, other: &DirectoryEntry) -> bool {
        (self.rev, &self.name) > (other.rev, &other.name)
    }
}

/// Ordinal → participants mapping used by exclusions and claims.
pub type ParticipantSets = BTreeMap<Ordinal, BTreeSet<ParticipantId>>;

/// Overwritable part of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// Current draw, if any.
    #[serde(default)]
    pub current_draw: Option<CurrentDraw>,
    /// Custom pool segment.
    #[serde(default)]
    pub custom: CustomSegment,
}

/// A peer's full shared-state view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Pool and current draw. Absent when the sender has no history yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<BoardSnapshot>,
    /// Exclusion set.
    #[serde(default)]
    pub exclusions: ParticipantSets,
    /// Claim map.
    #[serde(default)]
    pub claims: ParticipantSets,
    /// Participant directory.
    #[serde(default)]
    pub directory: BTreeMap<ParticipantId, DirectoryEntry>,
}

// =============================================================================
// STATE STORE
// =============================================================================

/// In-memory state of one room.
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Fixed catalogue.
    catalog: Arc<Catalog>,
    /// Custom pool segment.
    pub custom: CustomSegment,
    /// Ordinal → participants who excluded it.
    pub exclusions: ParticipantSets,
    /// Ordinal → participants who drew it.
    pub claims: ParticipantSets,
    /// Most recent settled draw.
    pub current_draw: Option<CurrentDraw>,
    /// Participant id → display name.
    pub directory: BTreeMap<ParticipantId, DirectoryEntry>,
    /// Highest draw stamp seen (survives reset).
    pub draw_clock: u64,
    /// Whether this peer holds any history for the room.
    has_history: bool,
}

impl StateStore {
    /// Create an empty store over a catalogue.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            custom: CustomSegment::default(),
            exclusions: BTreeMap::new(),
            claims: BTreeMap::new(),
            current_draw: None,
            directory: BTreeMap::new(),
            draw_clock: 0,
            has_history: false,
        }
    }

    /// The fixed catalogue.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Number of fixed items.
    pub fn fixed_count(&self) -> usize {
        self.catalog.len()
    }

    /// Whether an ordinal lies in the fixed segment.
    pub fn is_fixed(&self, ordinal: Ordinal) -> bool {
        ordinal >= 1 && (ordinal as usize) <= self.fixed_count()
    }

    /// Look up a live item.
    pub fn item(&self, ordinal: Ordinal) -> Option<Item> {
        if let Some((label, text)) = self.catalog.get(ordinal) {
            return Some(Item {
                ordinal,
                text: text.to_string(),
                category: label.to_string(),
                custom: false,
            });
        }
        let entry = self.custom.entry_at(ordinal, self.fixed_count())?;
        if self.custom.is_removed(&entry.id) {
            return None;
        }
        Some(Item {
            ordinal,
            text: entry.text.clone(),
            category: CUSTOM_CATEGORY.to_string(),
            custom: true,
        })
    }

    /// All live items, in ordinal order.
    pub fn pool(&self) -> Vec<Item> {
        let fixed = self.catalog.iter().map(|(ordinal, label, text)| Item {
            ordinal,
            text: text.to_string(),
            category: label.to_string(),
            custom: false,
        });
        let custom = self.custom.live(self.fixed_count()).map(|(ordinal, e)| Item {
            ordinal,
            text: e.text.clone(),
            category: CUSTOM_CATEGORY.to_string(),
            custom: true,
        });
        fixed.chain(custom).collect()
    }

    /// Live ordinals, in order.
    pub fn live_ordinals(&self) -> Vec<Ordinal> {
        let fixed = 1..=self.fixed_count() as Ordinal;
        fixed.chain(self.custom.live(self.fixed_count()).map(|(o, _)| o)).collect()
    }

    /// Number of live items.
    pub fn pool_len(&self) -> usize {
        self.fixed_count() + self.custom.live_len()
    }

    /// Whether `participant` has excluded `ordinal`.
    pub fn is_excluded_by(&self, ordinal: Ordinal, participant: &ParticipantId) -> bool {
        self.exclusions
            .get(&ordinal)
            .map(|set| set.contains(participant))
            .unwrap_or(false)
    }

    /// Ordinals excluded by `participant`.
    pub fn excluded_for(&self, participant: &ParticipantId) -> BTreeSet<Ordinal> {
        self.exclusions
            .iter()
            .filter(|(_, set)| set.contains(participant))
            .map(|(ordinal, _)| *ordinal)
            .collect()
    }

    /// Participants who drew `ordinal`.
    pub fn claimants(&self, ordinal: Ordinal) -> Vec<&ParticipantId> {
        self.claims
            .get(&ordinal)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// Display name of a participant, if known.
    pub fn display_name(&self, participant: &ParticipantId) -> Option<&str> {
        self.directory.get(participant).map(|e| e.name.as_str())
    }

    /// Current draw ordinal.
    pub fn current_ordinal(&self) -> Option<Ordinal> {
        self.current_draw.as_ref().map(|d| d.ordinal)
    }

    /// Stamp for the next local draw.
    pub fn next_draw_stamp(&self) -> u64 {
        self.draw_clock + 1
    }

    /// Whether this peer holds history for the room.
    pub fn has_history(&self) -> bool {
        self.has_history
    }

    /// Record that this peer now holds history for the room.
    pub fn mark_history(&mut self) {
        self.has_history = true;
    }

    /// Build a snapshot of the shared fields.
    ///
    /// The board is included only once this peer has history, so a fresh
    /// joiner's empty pool never overwrites the room.
    pub fn snapshot(&self) -> Snapshot {
        let board = self.has_history.then(|| BoardSnapshot {
            current_draw: self.current_draw.clone(),
            custom: self.custom.clone(),
        });
        Snapshot {
            board,
            exclusions: self.exclusions.clone(),
            claims: self.claims.clone(),
            directory: self.directory.clone(),
        }
    }

    /// Digest of the shared fields.
    ///
    /// Two peers with equal digests hold the same pool, exclusions,
    /// claims, current draw and directory.
    pub fn digest(&self) -> StateHash {
        let mut hasher = StateHasher::for_session_state();

        hasher.update_len(self.custom.entries().len());
        for entry in self.custom.entries() {
            hasher.update_str(entry.id.as_str());
            hasher.update_u32(entry.slot);
            hasher.update_str(&entry.text);
        }
        hasher.update_len(self.custom.removed().len());
        for id in self.custom.removed() {
            hasher.update_str(id.as_str());
        }

        for sets in [&self.exclusions, &self.claims] {
            hasher.update_len(sets.len());
            for (ordinal, set) in sets {
                hasher.update_u32(*ordinal);
                hasher.update_len(set.len());
                for participant in set {
                    hasher.update_str(participant.as_str());
                }
            }
        }

        match &self.current_draw {
            Some(draw) => {
                hasher.update_bool(true);
                hasher.update_u32(draw.ordinal);
                hasher.update_u64(draw.stamp);
                hasher.update_str(draw.by.as_str());
            }
            None => hasher.update_bool(false),
        }

        hasher.update_len(self.directory.len());
        for (participant, entry) in &self.directory {
            hasher.update_str(participant.as_str());
            hasher.update_str(&entry.name);
            hasher.update_u64(entry.rev);
        }

        hasher.finalize()
    }
}
