//! Game Logic Module
//!
//! Everything that mutates room state. Pure and transport-agnostic.
//!
//! ## Module Structure
//!
//! - `catalog`: Fixed item catalogue
//! - `state`: State store, pool, exclusion/claim maps, snapshots
//! - `merge`: Convergent folds for deltas and snapshots
//! - `draw`: Random draw resolution

pub mod catalog;
pub mod state;
pub mod merge;
pub mod draw;

// Re-export key types
pub use catalog::{Catalog, Category};
pub use state::{
    Item, ItemId, Ordinal, ParticipantId, Snapshot, StateStore, CustomEntry,
};
pub use draw::{DrawEngine, RollOutcome, SettledDraw};
