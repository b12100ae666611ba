//! The client state machine.
//!
//! Owns the connection lifecycle (resolve → connect → greet → active),
//! routes inbound messages to the screen and the key-state engine, and turns
//! local screen feedback into outgoing messages.  Everything here runs on
//! the event-loop thread; network tasks only talk to it through the queue.
//!
//! Lifecycle outcomes are posted as `ClientConnected`, `ClientFailed`, and
//! `ClientDisconnected` events on the client's token; the supervisor decides
//! whether to schedule a reconnect or quit.

pub mod clipboard;

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use synergy_core::protocol::clipboard::chunk_payload;
use synergy_core::protocol::messages::{
    ClipboardChunk, ClipboardId, MouseButton, OPTION_HALF_DUPLEX_CAPS_LOCK,
    OPTION_HALF_DUPLEX_NUM_LOCK, OPTION_HALF_DUPLEX_SCROLL_LOCK, OPTION_HEARTBEAT,
    OPTION_RELATIVE_MOUSE_MOVES, OPTION_SCREENSAVER_SYNC, PROTOCOL_MAJOR, PROTOCOL_MINOR,
};
use synergy_core::protocol::{ClipboardData, ProtocolError};
use synergy_core::{
    Event, EventKind, EventPayload, EventQueue, HandlerRegistry, KeyButton, KeyId,
    KeyStateEngine, KeystrokeProgram, Message, ModifierMask, SequenceFilter, Token,
};

use crate::client::clipboard::ClipboardSlots;
use crate::net::{self, Connection};
use crate::screen::{Screen, ScreenError};

/// Constant delay between reconnect attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

// ── Configuration ─────────────────────────────────────────────────────────────

/// Client-side settings for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Screen name announced in logs and status reports.
    pub name: String,
    /// Server host, re-resolved on every connect attempt.
    pub host: String,
    pub port: u16,
    /// Vertical scroll delta a single wheel notch maps to.
    pub yscroll: i32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "synergy".to_string(),
            host: "127.0.0.1".to_string(),
            port: synergy_core::protocol::messages::DEFAULT_PORT,
            yscroll: 120,
        }
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Server-set options, reset by `CROP` and on each new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Options {
    heartbeat_ms: u32,
    screensaver_sync: bool,
    relative_mouse: bool,
    half_duplex: ModifierMask,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            heartbeat_ms: 0,
            screensaver_sync: true,
            relative_mouse: false,
            half_duplex: ModifierMask::NONE,
        }
    }
}

// ── States ────────────────────────────────────────────────────────────────────

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Resolving,
    Connecting,
    Greeting,
    Active,
    Disconnected,
    FailedRetryable,
    FailedFatal,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Handle to the client state machine.  All methods must be called on the
/// event-loop thread.
pub struct Client {
    inner: Rc<RefCell<ClientInner>>,
    token: Token,
}

struct ClientInner {
    cfg: ClientConfig,
    queue: EventQueue,
    registry: HandlerRegistry,
    rt: tokio::runtime::Handle,
    token: Token,
    weak: Weak<RefCell<ClientInner>>,

    state: ClientState,
    /// Connect-attempt counter; events stamped with an older session are
    /// late deliveries from a torn-down attempt and are ignored.
    session: u64,
    conn: Option<Connection>,

    screen: Box<dyn Screen>,
    keystate: KeyStateEngine,
    enter_filter: SequenceFilter,
    at_screen: bool,
    slots: ClipboardSlots,
    options: Options,
    heartbeat_timer: Option<Token>,
    last_inbound: Instant,
}

impl Client {
    /// Creates the client and registers its event handlers.  The screen's
    /// driver must post its events with the token returned by
    /// [`Client::token`].
    pub fn new(
        cfg: ClientConfig,
        screen: Box<dyn Screen>,
        queue: &EventQueue,
        registry: &HandlerRegistry,
        rt: tokio::runtime::Handle,
    ) -> Client {
        let token = queue.new_token();
        let keystate = KeyStateEngine::new(screen.key_map());
        let inner = Rc::new_cyclic(|weak| {
            RefCell::new(ClientInner {
                cfg,
                queue: queue.clone(),
                registry: registry.clone(),
                rt,
                token,
                weak: weak.clone(),
                state: ClientState::Idle,
                session: 0,
                conn: None,
                screen,
                keystate,
                enter_filter: SequenceFilter::new(),
                at_screen: false,
                slots: ClipboardSlots::default(),
                options: Options::default(),
                heartbeat_timer: None,
                last_inbound: Instant::now(),
            })
        });

        for kind in [
            EventKind::Resolved,
            EventKind::Connected,
            EventKind::ConnectFailed,
            EventKind::Disconnected,
            EventKind::Message,
            EventKind::ClipboardGrabbed,
            EventKind::ScreensaverChanged,
            EventKind::KeymapChanged,
        ] {
            let weak = Rc::downgrade(&inner);
            registry.register(kind, token, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().on_event(event);
                }
            });
        }

        Client { inner, token }
    }

    /// The token lifecycle events are posted on.
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> ClientState {
        self.inner.borrow().state
    }

    /// Starts a connect attempt.  Ignored while one is already in flight.
    pub fn connect(&self) {
        self.inner.borrow_mut().connect();
    }

    /// Sends a polite close if a session is up, tears the connection down,
    /// and removes the client from the loop.
    pub fn shutdown(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == ClientState::Active {
            inner.send(&Message::Close);
        }
        inner.teardown_connection();
        inner.state = ClientState::Idle;
        inner.registry.unregister_target(self.token);
    }
}

impl ClientInner {
    fn connect(&mut self) {
        match self.state {
            ClientState::Resolving
            | ClientState::Connecting
            | ClientState::Greeting
            | ClientState::Active => {
                warn!("connect ignored: attempt already in flight ({:?})", self.state);
                return;
            }
            _ => {}
        }
        self.teardown_connection();
        self.session += 1;
        self.enter_filter.reset();
        self.slots.reset();
        self.options = Options::default();
        self.keystate.set_half_duplex(self.options.half_duplex);
        self.state = ClientState::Resolving;
        info!(
            "{}: connecting to {}:{}",
            self.cfg.name, self.cfg.host, self.cfg.port
        );
        net::resolve(
            &self.rt,
            self.cfg.host.clone(),
            self.cfg.port,
            self.session,
            self.queue.clone(),
            self.token,
        );
    }

    // ── Event routing ─────────────────────────────────────────────────────────

    fn on_event(&mut self, event: &Event) {
        match (&event.kind, &event.payload) {
            (EventKind::Resolved, EventPayload::Resolved { session, addrs }) => {
                self.on_resolved(*session, addrs.clone());
            }
            (EventKind::Connected, EventPayload::Connected { session }) => {
                self.on_connected(*session);
            }
            (EventKind::ConnectFailed, EventPayload::ConnectFailed { session, detail }) => {
                self.on_connect_failed(*session, detail.clone());
            }
            (
                EventKind::Disconnected,
                EventPayload::Disconnected {
                    session,
                    detail,
                    retryable,
                },
            ) => {
                self.on_disconnected(*session, detail.clone(), *retryable);
            }
            (EventKind::Message, EventPayload::Message { session, message }) => {
                self.on_message(*session, (**message).clone());
            }
            (EventKind::ClipboardGrabbed, EventPayload::Clipboard(id)) => {
                self.on_clipboard_grabbed(*id);
            }
            (EventKind::ScreensaverChanged, EventPayload::Flag(on)) => {
                debug!("local screensaver {}", if *on { "activated" } else { "deactivated" });
            }
            (EventKind::KeymapChanged, _) => {
                debug!("keyboard layout changed; rebuilding key map");
                self.keystate.set_key_map(self.screen.key_map());
            }
            _ => trace!("ignoring malformed event {:?}", event.kind),
        }
    }

    fn on_resolved(&mut self, session: u64, addrs: Vec<std::net::SocketAddr>) {
        if session != self.session || self.state != ClientState::Resolving {
            return;
        }
        let addr = addrs[0];
        debug!("connecting to {addr}");
        self.state = ClientState::Connecting;
        self.conn = Some(Connection::open(
            &self.rt,
            addr,
            session,
            self.queue.clone(),
            self.token,
        ));
    }

    fn on_connected(&mut self, session: u64) {
        if session != self.session || self.state != ClientState::Connecting {
            return;
        }
        self.state = ClientState::Greeting;
        self.send(&Message::own_hello());
    }

    fn on_connect_failed(&mut self, session: u64, detail: String) {
        if session != self.session {
            return;
        }
        self.fail(detail, true);
    }

    fn on_disconnected(&mut self, session: u64, detail: String, retryable: bool) {
        if session != self.session {
            return;
        }
        match self.state {
            ClientState::Active => {
                self.teardown_connection();
                self.state = ClientState::Disconnected;
                info!("disconnected from server: {detail}");
                self.post_lifecycle(EventKind::ClientDisconnected, detail, retryable);
            }
            ClientState::Connecting | ClientState::Greeting => {
                self.fail(detail, retryable);
            }
            _ => {}
        }
    }

    fn on_message(&mut self, session: u64, msg: Message) {
        if session != self.session {
            trace!("dropping message from stale session {session}");
            return;
        }
        self.last_inbound = Instant::now();
        match self.state {
            ClientState::Greeting => self.handle_greeting_message(msg),
            ClientState::Active => self.handle_server_message(msg),
            _ => trace!("dropping message in state {:?}", self.state),
        }
    }

    // ── Greeting ──────────────────────────────────────────────────────────────

    fn handle_greeting_message(&mut self, msg: Message) {
        match msg {
            Message::Hello { major, minor } => self.handle_hello(major, minor),
            Message::Close => {
                self.fail("server closed connection during handshake".to_string(), true);
            }
            other => debug!("ignoring {:?} during handshake", other.tag()),
        }
    }

    fn handle_hello(&mut self, major: u16, minor: u16) {
        if major > PROTOCOL_MAJOR {
            let err = ProtocolError::VersionMismatch { major, minor };
            error!("{err}");
            self.fail(err.to_string(), false);
            return;
        }
        info!(
            "connected to server, protocol {major}.{minor} (client {PROTOCOL_MAJOR}.{PROTOCOL_MINOR})"
        );
        self.state = ClientState::Active;
        self.send_info();
        self.keystate.set_key_map(self.screen.key_map());
        self.post_lifecycle(EventKind::ClientConnected, String::new(), true);
    }

    // ── Active-state message handling ─────────────────────────────────────────

    fn handle_server_message(&mut self, msg: Message) {
        match msg {
            Message::NoOp | Message::InfoAck => {}
            Message::KeepAlive => self.send(&Message::NoOp),
            Message::QueryInfo => self.send_info(),
            Message::ResetOptions => {
                self.options = Options::default();
                self.keystate.set_half_duplex(self.options.half_duplex);
                self.stop_heartbeat();
            }
            Message::SetOptions(pairs) => self.apply_options(&pairs),
            Message::Enter {
                x,
                y,
                seq,
                mask,
                for_screensaver,
            } => self.handle_enter(x, y, seq, mask, for_screensaver),
            Message::Leave => self.handle_leave(),
            Message::GrabClipboard { id, seq } => self.handle_grab_clipboard(id, seq),
            Message::ClipboardData { id, seq, chunk } => {
                self.handle_clipboard_data(id, seq, chunk);
            }
            Message::KeyDown { id, mask, button } => self.handle_key_down(id, mask, button),
            Message::KeyRepeat {
                id,
                mask,
                count,
                button,
            } => self.handle_key_repeat(id, mask, count, button),
            Message::KeyUp { id, button, .. } => {
                let program = self.keystate.key_up(id, button);
                self.run_program(&program);
            }
            Message::MouseDown { button } => self.fake_mouse_button(button, true),
            Message::MouseUp { button } => self.fake_mouse_button(button, false),
            Message::MouseMove { x, y } => {
                if let Err(e) = self.screen.fake_mouse_move(x, y) {
                    self.screen_failure(e);
                }
            }
            Message::MouseRelMove { dx, dy } => {
                if !self.options.relative_mouse {
                    debug!("relative move without MDLT option");
                }
                if let Err(e) = self.screen.fake_mouse_rel_move(dx, dy) {
                    self.screen_failure(e);
                }
            }
            Message::MouseWheel { dx, dy } => self.handle_wheel(dx, dy),
            Message::Screensaver { on } => {
                if self.options.screensaver_sync {
                    if let Err(e) = self.screen.set_screensaver(on) {
                        self.screen_failure(e);
                    }
                }
            }
            Message::Close => {
                self.teardown_connection();
                self.state = ClientState::Disconnected;
                info!("server closed the connection");
                self.post_lifecycle(
                    EventKind::ClientDisconnected,
                    "server closed connection".to_string(),
                    true,
                );
            }
            Message::Hello { .. } | Message::Info(_) => {
                debug!("ignoring unexpected message in active state");
            }
        }
    }

    fn handle_enter(&mut self, x: i16, y: i16, seq: u32, mask: ModifierMask, for_screensaver: bool) {
        if !self.enter_filter.accept(seq) {
            trace!("dropping stale enter (seq {seq})");
            return;
        }
        if let Err(e) = self.screen.enter(x, y, mask, for_screensaver) {
            self.screen_failure(e);
            return;
        }
        self.keystate.reconcile(mask);
        self.at_screen = true;
    }

    fn handle_leave(&mut self) {
        if !self.at_screen {
            debug!("ignoring leave: not at this screen");
            return;
        }
        self.flush_clipboards();
        if self.screen.leave() {
            self.at_screen = false;
            self.send(&Message::NoOp);
        } else {
            debug!("screen driver refused to release; leave blocked");
        }
    }

    fn handle_grab_clipboard(&mut self, id: ClipboardId, seq: u32) {
        let slot = self.slots.get_mut(id);
        if !slot.accept_seq(seq) {
            trace!("dropping stale clipboard grab (seq {seq})");
            return;
        }
        debug!("server grabbed clipboard {id:?}");
        slot.grabbed_remotely();
    }

    fn handle_clipboard_data(&mut self, id: ClipboardId, seq: u32, chunk: ClipboardChunk) {
        let slot = self.slots.get_mut(id);
        if !slot.accept_seq(seq) {
            slot.abort();
            trace!("dropping stale clipboard data (seq {seq})");
            return;
        }
        match slot.stage(chunk) {
            Ok(Some(payload)) => match ClipboardData::unmarshal(&payload) {
                Ok(data) => {
                    if let Err(e) = self.screen.set_clipboard(id, &data) {
                        self.screen_failure(e);
                    }
                }
                Err(e) => warn!("discarding clipboard {id:?}: {e}"),
            },
            Ok(None) => {}
            Err(e) => warn!("clipboard {id:?} transfer aborted: {e}"),
        }
    }

    fn handle_key_down(&mut self, id: KeyId, mask: ModifierMask, button: KeyButton) {
        match self.keystate.key_down(id, mask, button) {
            Ok(program) => self.run_program(&program),
            Err(e) => debug!("dropping key down: {e}"),
        }
    }

    fn handle_key_repeat(&mut self, id: KeyId, mask: ModifierMask, count: u16, button: KeyButton) {
        match self.keystate.key_repeat(id, mask, count, button) {
            Ok(program) => self.run_program(&program),
            Err(e) => debug!("dropping key repeat: {e}"),
        }
    }

    fn run_program(&mut self, program: &KeystrokeProgram) {
        for stroke in &program.strokes {
            if let Err(e) = self.screen.fake_key(stroke.button, stroke.press, stroke.repeat) {
                self.keystate.rollback(program);
                self.screen_failure(e);
                return;
            }
        }
    }

    fn fake_mouse_button(&mut self, button: MouseButton, press: bool) {
        if let Err(e) = self.screen.fake_mouse_button(button, press) {
            self.screen_failure(e);
        }
    }

    fn handle_wheel(&mut self, dx: i16, dy: i16) {
        // The wire delta is 120 per notch; scale to the configured delta.
        let dy = i32::from(dy) * self.cfg.yscroll / 120;
        if let Err(e) = self.screen.fake_mouse_wheel(i32::from(dx), dy) {
            self.screen_failure(e);
        }
    }

    // ── Options ───────────────────────────────────────────────────────────────

    fn apply_options(&mut self, pairs: &[(u32, u32)]) {
        for &(id, value) in pairs {
            match id {
                OPTION_HEARTBEAT => self.options.heartbeat_ms = value,
                OPTION_SCREENSAVER_SYNC => self.options.screensaver_sync = value != 0,
                OPTION_RELATIVE_MOUSE_MOVES => self.options.relative_mouse = value != 0,
                OPTION_HALF_DUPLEX_CAPS_LOCK => {
                    self.set_half_duplex_bit(ModifierMask::CAPS_LOCK, value != 0);
                }
                OPTION_HALF_DUPLEX_NUM_LOCK => {
                    self.set_half_duplex_bit(ModifierMask::NUM_LOCK, value != 0);
                }
                OPTION_HALF_DUPLEX_SCROLL_LOCK => {
                    self.set_half_duplex_bit(ModifierMask::SCROLL_LOCK, value != 0);
                }
                unknown => debug!("ignoring unknown option {unknown:#010x}"),
            }
        }
        self.keystate.set_half_duplex(self.options.half_duplex);
        self.start_heartbeat();
    }

    fn set_half_duplex_bit(&mut self, bit: ModifierMask, on: bool) {
        self.options.half_duplex = if on {
            self.options.half_duplex.union(bit)
        } else {
            self.options.half_duplex.difference(bit)
        };
    }

    // ── Heartbeat ─────────────────────────────────────────────────────────────

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        let interval_ms = self.options.heartbeat_ms;
        if interval_ms == 0 {
            return;
        }
        let timer = self
            .queue
            .new_periodic(Duration::from_millis(u64::from(interval_ms)));
        let weak = self.weak.clone();
        self.registry.register(EventKind::Timer, timer, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().on_heartbeat();
            }
        });
        self.heartbeat_timer = Some(timer);
        debug!("heartbeat every {interval_ms} ms");
    }

    fn stop_heartbeat(&mut self) {
        if let Some(timer) = self.heartbeat_timer.take() {
            self.queue.delete_timer(timer);
            self.registry.unregister(EventKind::Timer, timer);
        }
    }

    fn on_heartbeat(&mut self) {
        if self.state != ClientState::Active {
            return;
        }
        let limit = Duration::from_millis(u64::from(self.options.heartbeat_ms) * 2);
        if self.last_inbound.elapsed() > limit {
            warn!("no traffic from server within {limit:?}");
            self.teardown_connection();
            self.state = ClientState::Disconnected;
            self.post_lifecycle(
                EventKind::ClientDisconnected,
                "server stopped responding".to_string(),
                true,
            );
            return;
        }
        self.send(&Message::KeepAlive);
    }

    // ── Local clipboard ───────────────────────────────────────────────────────

    fn on_clipboard_grabbed(&mut self, id: ClipboardId) {
        let seq = self.enter_filter.last().unwrap_or(0);
        let slot = self.slots.get_mut(id);
        slot.grabbed();
        slot.seq = seq;
        if self.state == ClientState::Active {
            self.send(&Message::GrabClipboard { id, seq });
        }
    }

    /// Pushes locally-owned dirty clipboards to the server; called before
    /// the cursor leaves this screen.
    fn flush_clipboards(&mut self) {
        for id in self.slots.dirty_local() {
            let data = match self.screen.get_clipboard(id) {
                Ok(data) => data,
                Err(e) => {
                    warn!("cannot read clipboard {id:?}: {e}");
                    continue;
                }
            };
            let payload = data.marshal();
            let seq = self.slots.get(id).seq;
            for chunk in chunk_payload(&payload) {
                self.send(&Message::ClipboardData { id, seq, chunk });
            }
            self.slots.get_mut(id).dirty = false;
        }
    }

    // ── Failure and teardown ──────────────────────────────────────────────────

    fn send_info(&mut self) {
        let mut info = self.screen.shape().info();
        (info.mx, info.my) = self.screen.cursor_pos();
        self.send(&Message::Info(info));
    }

    fn send(&self, msg: &Message) {
        match &self.conn {
            Some(conn) => conn.send(msg),
            None => debug!("dropping outbound message: not connected"),
        }
    }

    fn fail(&mut self, detail: String, retryable: bool) {
        self.teardown_connection();
        self.state = if retryable {
            ClientState::FailedRetryable
        } else {
            ClientState::FailedFatal
        };
        self.post_lifecycle(EventKind::ClientFailed, detail, retryable);
    }

    fn screen_failure(&mut self, err: ScreenError) {
        error!("screen error: {err}");
        let retryable = matches!(err, ScreenError::Unavailable { .. });
        self.queue.post(Event::with_payload(
            EventKind::ScreenError,
            self.token,
            EventPayload::Status {
                detail: err.to_string(),
                retryable,
            },
        ));
    }

    fn post_lifecycle(&self, kind: EventKind, detail: String, retryable: bool) {
        self.queue.post(Event::with_payload(
            kind,
            self.token,
            EventPayload::Status { detail, retryable },
        ));
    }

    fn teardown_connection(&mut self) {
        self.stop_heartbeat();
        self.conn = None;
        self.at_screen = false;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
