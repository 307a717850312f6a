//! Room Session Management
//!
//! The session controller owns the relay subscription for the active room,
//! runs the snapshot exchange on join, and is the single place where local
//! mutations become outgoing messages.
//!
//! Every local operation follows the same order: mutate the store, write the
//! cache, then broadcast. A failed broadcast leaves the room in local-only
//! mode; nothing is retried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::hash::{short_hex, StateHash};
use crate::game::catalog::Catalog;
use crate::game::draw::{DrawEngine, RollOutcome};
use crate::game::merge;
use crate::game::state::{CustomEntry, ItemId, Ordinal, ParticipantId, StateStore};
use crate::network::protocol::{
    AddQuestionPayload, PeerTag, RemoveQuestionPayload, ResetPayload, RollPayload,
    SetNamePayload, SyncMessage, SyncStatePayload, ToggleExcludePayload, Envelope,
};
use crate::network::relay::{
    ChannelEvent, RelayChannel, SubscribeOptions, Subscription, SubscriptionId,
};
use crate::storage::{self, LocalCache};

/// Longest accepted room code.
pub const MAX_ROOM_CODE_LEN: usize = 64;

/// Session errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No room is joined.
    #[error("Not in a room")]
    NotJoined,

    /// Room code is empty or too long.
    #[error("Invalid room code: {0:?}")]
    InvalidRoomCode(String),

    /// No live item has this ordinal.
    #[error("Unknown ordinal: {0}")]
    UnknownOrdinal(Ordinal),

    /// Text or name was blank.
    #[error("Empty text")]
    EmptyText,
}

/// Configuration for room sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Topic prefix; the topic is `{prefix}:{room}`.
    pub topic_prefix: String,
    /// Ask the relay to echo our own messages back.
    pub echo_self: bool,
    /// Display name used until one is set.
    pub default_name: String,
    /// Preview frames in an animated roll.
    pub spin_ticks: u32,
    /// Delay between preview frames.
    pub spin_interval: Duration,
    /// Pinned participant id. Generated when absent.
    pub participant_id: Option<ParticipantId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "number-game".to_string(),
            echo_self: false,
            default_name: "Player".to_string(),
            spin_ticks: 22,
            spin_interval: Duration::from_millis(70),
            participant_id: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `ROOM_DRAW_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("ROOM_DRAW_TOPIC_PREFIX") {
            if !prefix.is_empty() {
                config.topic_prefix = prefix;
            }
        }
        if let Ok(echo) = std::env::var("ROOM_DRAW_ECHO_SELF") {
            config.echo_self = matches!(echo.as_str(), "1" | "true" | "yes");
        }
        if let Ok(name) = std::env::var("ROOM_DRAW_DEFAULT_NAME") {
            if !name.trim().is_empty() {
                config.default_name = name.trim().to_string();
            }
        }
        if let Ok(ticks) = std::env::var("ROOM_DRAW_SPIN_TICKS") {
            match ticks.parse() {
                Ok(ticks) => config.spin_ticks = ticks,
                Err(e) => warn!("Ignoring ROOM_DRAW_SPIN_TICKS {:?}: {}", ticks, e),
            }
        }
        if let Ok(ms) = std::env::var("ROOM_DRAW_SPIN_INTERVAL_MS") {
            match ms.parse() {
                Ok(ms) => config.spin_interval = Duration::from_millis(ms),
                Err(e) => warn!("Ignoring ROOM_DRAW_SPIN_INTERVAL_MS {:?}: {}", ms, e),
            }
        }
        if let Ok(id) = std::env::var("ROOM_DRAW_PARTICIPANT_ID") {
            if !id.trim().is_empty() {
                config.participant_id = Some(ParticipantId::new(id.trim()));
            }
        }

        config
    }
}

/// A validated room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Trim and validate a room code.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let code = raw.trim();
        if code.is_empty() || code.len() > MAX_ROOM_CODE_LEN {
            return Err(SessionError::InvalidRoomCode(raw.to_string()));
        }
        Ok(Self(code.to_string()))
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One room activation.
///
/// Created on join, dropped on leave or room switch. Its subscription is
/// `None` when the relay was unavailable (local-only mode).
pub struct Session {
    room: RoomCode,
    topic: String,
    subscription: Option<Subscription>,
    subscribed: bool,
    store: StateStore,
    rolling: bool,
}

impl Session {
    /// Room code.
    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    /// Relay topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Room state.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Whether the relay acknowledged the subscription.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Whether a draw animation is running.
    pub fn is_rolling(&self) -> bool {
        self.rolling
    }

    fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(Subscription::id)
    }
}

/// An event pulled from the active subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Subscription the event arrived on.
    pub subscription: SubscriptionId,
    /// The event.
    pub event: ChannelEvent,
}

/// What the controller did with an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum HandledEvent {
    /// Subscription acknowledged; a snapshot request went out.
    Acknowledged,
    /// A message was merged into the store.
    Applied(SyncMessage),
    /// Stale, own echo, malformed or incompatible.
    Dropped,
    /// The transport closed; the room is now local-only.
    Closed,
}

/// Drives one participant's view of a room.
pub struct SessionController<R: RelayChannel, C: LocalCache> {
    relay: R,
    cache: C,
    catalog: Arc<Catalog>,
    catalog_tag: String,
    config: SessionConfig,
    participant: ParticipantId,
    display_name: String,
    draw: DrawEngine,
    session: Option<Session>,
}

impl<R: RelayChannel, C: LocalCache> SessionController<R, C> {
    /// Create a controller. No room is joined yet.
    pub fn new(relay: R, cache: C, catalog: Arc<Catalog>, config: SessionConfig) -> Self {
        let participant = config.participant_id.clone().unwrap_or_else(ParticipantId::generate);
        let display_name = config.default_name.clone();
        let catalog_tag = hex::encode(catalog.fingerprint());

        Self {
            relay,
            cache,
            catalog,
            catalog_tag,
            config,
            participant,
            display_name,
            draw: DrawEngine::default(),
            session: None,
        }
    }

    /// Replace the draw engine.
    pub fn with_draw_engine(mut self, draw: DrawEngine) -> Self {
        self.draw = draw;
        self
    }

    /// This participant's id.
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// This participant's display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Relay tag of this controller's handle.
    pub fn peer(&self) -> PeerTag {
        self.relay.peer()
    }

    /// The relay handle.
    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// The local cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Give back the cache.
    pub fn into_cache(self) -> C {
        self.cache
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Room joined most recently, from the cache.
    pub fn last_room(&self) -> Option<String> {
        storage::last_room(&self.cache)
    }

    /// Active session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Active room code.
    pub fn room(&self) -> Option<&RoomCode> {
        self.session.as_ref().map(|s| &s.room)
    }

    /// Active room state.
    pub fn state(&self) -> Option<&StateStore> {
        self.session.as_ref().map(|s| &s.store)
    }

    /// Whether a room is joined.
    pub fn is_joined(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the active subscription is acknowledged.
    pub fn is_subscribed(&self) -> bool {
        self.session.as_ref().map(|s| s.subscribed).unwrap_or(false)
    }

    /// Whether the room has a live subscription (acknowledged or not).
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().map(|s| s.subscription.is_some()).unwrap_or(false)
    }

    /// Whether a draw animation is running.
    pub fn is_rolling(&self) -> bool {
        self.session.as_ref().map(|s| s.rolling).unwrap_or(false)
    }

    /// Id of the active subscription.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.session.as_ref().and_then(Session::subscription_id)
    }

    /// Digest of the active room state.
    pub fn digest(&self) -> Option<StateHash> {
        self.state().map(StateStore::digest)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Join a room, leaving the current one first.
    ///
    /// Hydrates from the cache and subscribes. The snapshot request goes
    /// out once the relay acknowledges. If the relay is unavailable the room
    /// is joined in local-only mode.
    pub fn join(&mut self, room: &str) -> Result<(), SessionError> {
        let room = RoomCode::parse(room)?;
        self.leave();

        let mut store = StateStore::new(self.catalog.clone());
        let hydrated = storage::load_room(&self.cache, room.as_str(), &mut store);

        if let Some(name) = storage::load_player_name(&self.cache, room.as_str()) {
            self.display_name = name;
        }
        match store.directory.get(&self.participant) {
            None => {
                merge::note_name(&mut store, &self.participant, &self.display_name);
            }
            Some(entry) if entry.name != self.display_name => {
                let rev = entry.rev + 1;
                merge::apply_set_name(&mut store, &self.participant, &self.display_name, rev);
            }
            Some(_) => {}
        }

        if let Err(e) = storage::save_last_room(&mut self.cache, room.as_str()) {
            warn!("Failed to remember room {}: {}", room, e);
        }

        let topic = format!("{}:{}", self.config.topic_prefix, room);
        let options = SubscribeOptions { echo_self: self.config.echo_self };
        let subscription = match self.relay.subscribe(&topic, options) {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!("Relay unavailable, room {} is local-only: {}", room, e);
                None
            }
        };

        info!(
            "Joined room {} as {} ({}), hydrated: {}",
            room, self.display_name, self.participant, hydrated
        );

        self.session = Some(Session {
            room,
            topic,
            subscription,
            subscribed: false,
            store,
            rolling: false,
        });
        Ok(())
    }

    /// Leave the active room. Sends nothing to peers.
    pub fn leave(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(subscription) = session.subscription {
                self.relay.unsubscribe(subscription);
            }
            info!("Left room {}", session.room);
        }
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Handle every event already queued on the active subscription.
    pub fn poll(&mut self) -> Vec<HandledEvent> {
        let mut handled = Vec::new();
        loop {
            let inbound = {
                let Some(subscription) = self.session.as_mut().and_then(|s| s.subscription.as_mut()) else {
                    break;
                };
                let id = subscription.id();
                match subscription.try_next() {
                    Some(event) => InboundEvent { subscription: id, event },
                    None => break,
                }
            };
            handled.push(self.handle_event(inbound));
        }
        handled
    }

    /// Wait for the next event on the active subscription.
    ///
    /// `None` when there is no subscription or it has ended.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        let subscription = self.session.as_mut()?.subscription.as_mut()?;
        let id = subscription.id();
        let event = subscription.next().await?;
        Some(InboundEvent { subscription: id, event })
    }

    /// Handle one inbound event.
    pub fn handle_event(&mut self, inbound: InboundEvent) -> HandledEvent {
        {
            let Some(session) = self.session.as_mut() else {
                debug!("Dropping event with no active room");
                return HandledEvent::Dropped;
            };
            if session.subscription_id() != Some(inbound.subscription) {
                debug!("Dropping event from stale subscription {}", inbound.subscription);
                return HandledEvent::Dropped;
            }
            match &inbound.event {
                ChannelEvent::Subscribed => session.subscribed = true,
                ChannelEvent::Closed => {
                    session.subscription = None;
                    session.subscribed = false;
                }
                ChannelEvent::Delivery { .. } => {}
            }
        }

        match inbound.event {
            ChannelEvent::Subscribed => {
                if let Some(session) = &self.session {
                    info!("Subscribed to {}, requesting snapshots", session.topic);
                }
                self.send_snapshot(true);
                HandledEvent::Acknowledged
            }
            ChannelEvent::Closed => {
                warn!("Relay closed, continuing local-only");
                HandledEvent::Closed
            }
            ChannelEvent::Delivery { sender, envelope } => self.handle_delivery(sender, envelope),
        }
    }

    fn handle_delivery(&mut self, sender: PeerTag, envelope: Envelope) -> HandledEvent {
        if sender == self.relay.peer() {
            debug!("Dropping own echo of {}", envelope.event);
            return HandledEvent::Dropped;
        }

        let message = match SyncMessage::from_envelope(&envelope) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed {} from peer {}: {}", envelope.event, sender, e);
                return HandledEvent::Dropped;
            }
        };

        if let SyncMessage::SyncState(payload) = &message {
            if matches!(payload.catalog.as_deref(), Some(tag) if tag != self.catalog_tag) {
                warn!("Dropping snapshot from {} built on a different catalogue", payload.from);
                return HandledEvent::Dropped;
            }
        }

        let Some(session) = self.session.as_mut() else {
            return HandledEvent::Dropped;
        };

        let changed = apply_message(&mut session.store, &message);
        debug!(
            "Applied {} from peer {} in {} (changed: {}, digest {})",
            message.event_name(),
            sender,
            session.room,
            changed,
            short_hex(&session.store.digest())
        );
        if changed {
            persist(&mut self.cache, session);
        }

        if matches!(&message, SyncMessage::SyncState(p) if p.request) {
            self.send_snapshot(false);
        }

        HandledEvent::Applied(message)
    }

    // =========================================================================
    // LOCAL OPERATIONS
    // =========================================================================

    /// Draw immediately.
    pub fn roll(&mut self) -> Result<RollOutcome, SessionError> {
        let session = self.session.as_ref().ok_or(SessionError::NotJoined)?;
        if session.rolling {
            return Ok(RollOutcome::AlreadyRolling);
        }
        self.settle_now()
    }

    /// Start a draw animation. Settle it with [`Self::settle_roll`].
    pub fn begin_roll(&mut self) -> Result<RollOutcome, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotJoined)?;
        if session.rolling {
            return Ok(RollOutcome::AlreadyRolling);
        }
        if DrawEngine::available(&session.store, &self.participant).is_empty() {
            return Ok(RollOutcome::NothingAvailable);
        }
        session.rolling = true;
        Ok(RollOutcome::Spinning)
    }

    /// Preview pick for the next animation frame.
    pub fn spin_frame(&mut self) -> Option<Ordinal> {
        let session = self.session.as_ref()?;
        if !session.rolling {
            return None;
        }
        self.draw.spin_preview(&session.store, &self.participant)
    }

    /// End a draw animation and settle the draw.
    pub fn settle_roll(&mut self) -> Result<RollOutcome, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotJoined)?;
        session.rolling = false;
        self.settle_now()
    }

    /// Run a full draw animation, reporting each preview frame.
    pub async fn roll_animated<F>(&mut self, mut on_frame: F) -> Result<RollOutcome, SessionError>
    where
        F: FnMut(Ordinal),
    {
        match self.begin_roll()? {
            RollOutcome::Spinning => {}
            other => return Ok(other),
        }

        let mut ticker = tokio::time::interval(self.config.spin_interval);
        for _ in 0..self.config.spin_ticks {
            ticker.tick().await;
            if let Some(ordinal) = self.spin_frame() {
                on_frame(ordinal);
            }
        }

        self.settle_roll()
    }

    fn settle_now(&mut self) -> Result<RollOutcome, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotJoined)?;
        let Some(draw) = self.draw.settle(&mut session.store, &self.participant) else {
            debug!("Nothing left to draw in {}", session.room);
            return Ok(RollOutcome::NothingAvailable);
        };

        info!("Drew {} in room {}", draw.ordinal, session.room);
        self.commit(SyncMessage::Roll(RollPayload {
            ordinal: draw.ordinal,
            id: self.participant.clone(),
            name: self.display_name.clone(),
            stamp: draw.stamp,
        }));
        Ok(RollOutcome::Settled(draw.ordinal))
    }

    /// Flip this participant's exclusion of an item. Returns the new value.
    pub fn toggle_exclude(&mut self, ordinal: Ordinal) -> Result<bool, SessionError> {
        let store = self.state().ok_or(SessionError::NotJoined)?;
        let excluded = store.is_excluded_by(ordinal, &self.participant);
        self.set_excluded(ordinal, !excluded)
    }

    /// Set this participant's exclusion of an item.
    pub fn set_excluded(&mut self, ordinal: Ordinal, excluded: bool) -> Result<bool, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotJoined)?;
        if session.store.item(ordinal).is_none() {
            return Err(SessionError::UnknownOrdinal(ordinal));
        }
        if !merge::apply_toggle_exclude(&mut session.store, ordinal, &self.participant, excluded) {
            return Ok(excluded);
        }

        self.commit(SyncMessage::ToggleExclude(ToggleExcludePayload {
            ordinal,
            is_excluded: excluded,
            id: self.participant.clone(),
            name: self.display_name.clone(),
        }));
        Ok(excluded)
    }

    /// Add a custom item. Returns its ordinal.
    pub fn add_item(&mut self, text: &str) -> Result<Ordinal, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyText);
        }
        let session = self.session.as_mut().ok_or(SessionError::NotJoined)?;

        let fixed = session.store.fixed_count();
        let entry = CustomEntry {
            id: ItemId::generate(),
            slot: session.store.custom.next_slot(fixed),
            text: text.to_string(),
        };
        merge::apply_add_custom_item(&mut session.store, entry.clone());
        let ordinal = session.store.custom
            .ordinal_of(&entry.id, fixed)
            .ok_or(SessionError::UnknownOrdinal(entry.slot))?;

        debug!("Added item {} as ordinal {}", entry.id.as_str(), ordinal);
        self.commit(SyncMessage::AddQuestion(AddQuestionPayload {
            text: entry.text,
            id: entry.id,
            slot: entry.slot,
        }));
        Ok(ordinal)
    }

    /// Remove a custom item. Fixed ordinals are left alone and return `false`.
    pub fn remove_item(&mut self, ordinal: Ordinal) -> Result<bool, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotJoined)?;
        if session.store.is_fixed(ordinal) {
            debug!("Ignoring removal of fixed ordinal {}", ordinal);
            return Ok(false);
        }

        let fixed = session.store.fixed_count();
        let id = match session.store.custom.entry_at(ordinal, fixed) {
            Some(entry) => entry.id.clone(),
            None => return Err(SessionError::UnknownOrdinal(ordinal)),
        };
        if !merge::apply_remove_custom_item(&mut session.store, ordinal, Some(&id)) {
            return Ok(false);
        }

        self.commit(SyncMessage::RemoveQuestion(RemoveQuestionPayload {
            ordinal,
            id: Some(id),
        }));
        Ok(true)
    }

    /// Change the display name. Broadcast when a room is joined.
    pub fn set_display_name(&mut self, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyText);
        }
        self.display_name = name.to_string();

        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let rev = session.store.directory
            .get(&self.participant)
            .map(|entry| entry.rev + 1)
            .unwrap_or(1);
        merge::apply_set_name(&mut session.store, &self.participant, name, rev);
        if let Err(e) = storage::save_player_name(&mut self.cache, session.room.as_str(), name) {
            warn!("Failed to cache display name: {}", e);
        }

        info!("Renamed to {} in room {}", name, session.room);
        self.commit(SyncMessage::SetName(SetNamePayload {
            id: self.participant.clone(),
            name: name.to_string(),
            rev,
        }));
        Ok(())
    }

    /// Clear the current draw, exclusions and claims for everyone.
    pub fn reset_session(&mut self) -> Result<(), SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NotJoined)?;
        merge::apply_reset(&mut session.store);

        info!("Reset room {}", session.room);
        self.commit(SyncMessage::Reset(ResetPayload { id: self.participant.clone() }));
        Ok(())
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    fn commit(&mut self, message: SyncMessage) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        persist(&mut self.cache, session);
        debug!("Room {} digest {}", session.room, short_hex(&session.store.digest()));
        broadcast(&mut self.relay, session, &message);
    }

    fn send_snapshot(&mut self, request: bool) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let message = SyncMessage::SyncState(SyncStatePayload {
            from: self.participant.clone(),
            request,
            catalog: Some(self.catalog_tag.clone()),
            state: session.store.snapshot(),
        });
        broadcast(&mut self.relay, session, &message);
    }
}

/// Fold an inbound message into the store. Returns whether it changed.
fn apply_message(store: &mut StateStore, message: &SyncMessage) -> bool {
    match message {
        SyncMessage::Roll(p) => {
            let named = merge::note_name(store, &p.id, &p.name);
            merge::apply_roll(store, p.ordinal, &p.id, p.stamp) | named
        }
        SyncMessage::ToggleExclude(p) => {
            let named = merge::note_name(store, &p.id, &p.name);
            merge::apply_toggle_exclude(store, p.ordinal, &p.id, p.is_excluded) | named
        }
        SyncMessage::AddQuestion(p) => merge::apply_add_custom_item(store, p.to_entry()),
        SyncMessage::RemoveQuestion(p) => {
            merge::apply_remove_custom_item(store, p.ordinal, p.id.as_ref())
        }
        SyncMessage::SetName(p) => merge::apply_set_name(store, &p.id, &p.name, p.rev),
        SyncMessage::SyncState(p) => merge::apply_snapshot(store, p.state.clone()),
        SyncMessage::Reset(_) => merge::apply_reset(store),
    }
}

fn persist<C: LocalCache>(cache: &mut C, session: &Session) {
    if let Err(e) = storage::save_room(cache, session.room.as_str(), &session.store) {
        warn!("Failed to cache room {}: {}", session.room, e);
    }
}

fn broadcast<R: RelayChannel>(relay: &mut R, session: &Session, message: &SyncMessage) {
    let Some(subscription) = session.subscription.as_ref() else {
        debug!("Room {} is local-only, not sending {}", session.room, message.event_name());
        return;
    };
    let envelope = match message.to_envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Failed to encode {}: {}", message.event_name(), e);
            return;
        }
    };
    if let Err(e) = relay.send(subscription, envelope) {
        warn!("Failed to send {}, continuing local-only: {}", message.event_name(), e);
    }
}
