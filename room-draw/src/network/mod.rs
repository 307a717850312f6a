//! Network Layer
//!
//! Relay transport, wire protocol and the per-room session controller.
//! All room state changes still go through `game/`.

pub mod protocol;
pub mod relay;
pub mod ws;
pub mod server;
pub mod session;

pub use protocol::{Envelope, PeerTag, ProtocolError, RelayNotice, RelayRequest, SyncMessage};
pub use relay::{
    ChannelEvent, LocalHub, LocalRelay, RelayChannel, RelayError, SubscribeOptions, Subscription,
};
pub use ws::WsRelay;
pub use server::{RelayServer, RelayServerConfig, RelayServerError};
pub use session::{
    HandledEvent, InboundEvent, RoomCode, Session, SessionConfig, SessionController, SessionError,
};
