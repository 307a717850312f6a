//! # Room Draw
//!
//! Peer state synchronization for a shared number-draw room.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         ROOM DRAW                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── rng.rs      - Xorshift128+ draw RNG                     │
//! │  └── hash.rs     - State digests                             │
//! │                                                              │
//! │  game/           - Room state (pure, transport-agnostic)     │
//! │  ├── catalog.rs  - Fixed item catalogue                      │
//! │  ├── state.rs    - Pool, exclusions, claims, directory       │
//! │  ├── merge.rs    - Convergent folds for deltas/snapshots     │
//! │  └── draw.rs     - Random draw resolution                    │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── protocol.rs - Sync messages and relay frames            │
//! │  ├── relay.rs    - Relay channel trait, in-process hub       │
//! │  ├── ws.rs       - WebSocket relay client                    │
//! │  ├── server.rs   - WebSocket relay server                    │
//! │  └── session.rs  - Session controller                        │
//! │                                                              │
//! │  storage/        - Local persistent cache                    │
//! │  ├── memory.rs   - In-memory cache                           │
//! │  └── file.rs     - JSON file cache                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Convergence
//!
//! There is no authority. Every peer folds the same messages with the
//! functions in `game::merge`, which are idempotent and (apart from an
//! exclusion being withdrawn) order-independent:
//! - Exclusions and claims only grow by union
//! - The current draw is a last-writer-wins register on `(stamp, participant)`
//! - Custom items are a grow-only set with tombstones, ordered by `(slot, id)`
//!
//! A joining peer broadcasts a snapshot request; every peer already in the
//! room answers once with its own snapshot.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use core::rng::DrawRng;
pub use core::hash::{StateHash, StateHasher};
pub use game::catalog::Catalog;
pub use game::draw::{DrawEngine, RollOutcome};
pub use game::state::{Item, ItemId, Ordinal, ParticipantId, Snapshot, StateStore};
pub use network::relay::{LocalHub, LocalRelay, RelayChannel};
pub use network::session::{SessionConfig, SessionController};
pub use storage::{FileCache, LocalCache, MemoryCache};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
