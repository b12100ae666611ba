//! Event queue, timers, and the cooperative dispatcher.
//!
//! All business logic runs on a single loop thread that blocks in
//! [`EventQueue::next_event`].  Other threads (socket tasks, platform
//! pumps) interact with the loop only by enqueueing events; the queue is the
//! one cross-thread object in the system.
//!
//! Handlers are registered against `(event kind, token)` pairs and looked up
//! exactly; events with no matching handler are discarded.  Tokens are issued
//! by the queue, so components hold plain copyable identities instead of
//! pointers to each other – dropping a component's registrations tears it out
//! of the loop with no cycles to break.

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::protocol::messages::ClipboardId;
use crate::protocol::Message;

// ── Tokens ────────────────────────────────────────────────────────────────────

/// Opaque identity issued at subscription time.  Targets of events and keys
/// of handler registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    /// The null target, used by broadcast-style events such as quit.
    pub const NONE: Token = Token(0);
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Terminates the dispatch loop.
    Quit,
    /// A timer created by [`EventQueue::new_one_shot`]/[`new_periodic`] fired;
    /// the target is the timer's own token.
    Timer,
    /// A decoded protocol message arrived from the server.
    Message,
    /// Address resolution finished.
    Resolved,
    /// The TCP connection was established.
    Connected,
    /// The TCP connect attempt failed.
    ConnectFailed,
    /// An established connection was lost or closed.
    Disconnected,
    /// The screen driver hit a fatal runtime error.
    ScreenError,
    /// A local application grabbed one of our clipboards.
    ClipboardGrabbed,
    /// The local screensaver started or stopped.
    ScreensaverChanged,
    /// The keyboard layout changed; the key map must be rebuilt.
    KeymapChanged,
    /// The client session reached the active state.
    ClientConnected,
    /// The client failed to reach the active state.
    ClientFailed,
    /// An active client session ended.
    ClientDisconnected,
}

/// Payload carried by an [`Event`].  Variants that originate from network
/// tasks carry the session number of the connect attempt that produced them
/// so handlers can ignore late deliveries from a cancelled session.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    Message {
        session: u64,
        message: Box<Message>,
    },
    Resolved {
        session: u64,
        addrs: Vec<SocketAddr>,
    },
    Connected {
        session: u64,
    },
    ConnectFailed {
        session: u64,
        detail: String,
    },
    Disconnected {
        session: u64,
        detail: String,
        retryable: bool,
    },
    /// Client lifecycle detail surfaced to the supervisor.
    Status {
        detail: String,
        retryable: bool,
    },
    Clipboard(ClipboardId),
    Flag(bool),
}

/// A queued event: type tag, target, payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub target: Token,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(kind: EventKind, target: Token) -> Event {
        Event {
            kind,
            target,
            payload: EventPayload::None,
        }
    }

    pub fn with_payload(kind: EventKind, target: Token, payload: EventPayload) -> Event {
        Event {
            kind,
            target,
            payload,
        }
    }

    pub fn quit() -> Event {
        Event::new(EventKind::Quit, Token::NONE)
    }
}

// ── Timers ────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Instant,
    token: Token,
}

// BinaryHeap is a max-heap; order reversed so the earliest deadline pops first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.token.cmp(&self.token))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy)]
struct TimerSpec {
    /// `None` for one-shot timers.
    period: Option<Duration>,
}

// ── Queue ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct QueueState {
    events: VecDeque<Event>,
    heap: BinaryHeap<TimerEntry>,
    timers: HashMap<Token, TimerSpec>,
    next_token: u64,
}

impl QueueState {
    /// Moves every due timer into the event queue.  Returns the next pending
    /// deadline, if any timer remains.
    fn fire_due_timers(&mut self, now: Instant) -> Option<Instant> {
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                return Some(entry.deadline);
            }
            let entry = self.heap.pop().expect("peeked entry exists");
            let Some(spec) = self.timers.get(&entry.token).copied() else {
                // Cancelled timer; its heap entry is stale.
                continue;
            };
            self.events
                .push_back(Event::new(EventKind::Timer, entry.token));
            match spec.period {
                Some(period) => self.heap.push(TimerEntry {
                    deadline: now + period,
                    token: entry.token,
                }),
                None => {
                    // Firing a one-shot deregisters it.
                    self.timers.remove(&entry.token);
                }
            }
        }
        None
    }
}

/// Thread-safe FIFO of events plus the timer source.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<(Mutex<QueueState>, Condvar)>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> EventQueue {
        EventQueue {
            inner: Arc::new((
                Mutex::new(QueueState {
                    next_token: 1,
                    ..QueueState::default()
                }),
                Condvar::new(),
            )),
        }
    }

    /// Issues a fresh token for use as an event target.
    pub fn new_token(&self) -> Token {
        let mut state = self.lock();
        let token = Token(state.next_token);
        state.next_token += 1;
        token
    }

    /// Enqueues an event.  Safe from any thread.
    pub fn post(&self, event: Event) {
        let (mutex, cond) = &*self.inner;
        mutex.lock().expect("queue poisoned").events.push_back(event);
        cond.notify_one();
    }

    /// Enqueues the quit event that terminates the dispatch loop.
    pub fn post_quit(&self) {
        self.post(Event::quit());
    }

    /// Creates a timer that fires once after `delay`.  The returned token is
    /// the timer's identity: register a `Timer` handler on it, and pass it to
    /// [`delete_timer`] to cancel.
    pub fn new_one_shot(&self, delay: Duration) -> Token {
        self.new_timer(delay, None)
    }

    /// Creates a timer that fires every `interval` until deleted.
    pub fn new_periodic(&self, interval: Duration) -> Token {
        self.new_timer(interval, Some(interval))
    }

    fn new_timer(&self, delay: Duration, period: Option<Duration>) -> Token {
        let (mutex, cond) = &*self.inner;
        let mut state = mutex.lock().expect("queue poisoned");
        let token = Token(state.next_token);
        state.next_token += 1;
        state.timers.insert(token, TimerSpec { period });
        state.heap.push(TimerEntry {
            deadline: Instant::now() + delay,
            token,
        });
        cond.notify_one();
        token
    }

    /// Cancels a timer.  Returns `false` if the timer already fired (one-shot)
    /// or was never created.
    pub fn delete_timer(&self, token: Token) -> bool {
        self.lock().timers.remove(&token).is_some()
    }

    /// Blocks until the next event is available, waking for timer deadlines.
    pub fn next_event(&self) -> Event {
        let (mutex, cond) = &*self.inner;
        let mut state = mutex.lock().expect("queue poisoned");
        loop {
            let next_deadline = state.fire_due_timers(Instant::now());
            if let Some(event) = state.events.pop_front() {
                return event;
            }
            state = match next_deadline {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    cond.wait_timeout(state, timeout).expect("queue poisoned").0
                }
                None => cond.wait(state).expect("queue poisoned"),
            };
        }
    }

    /// Like [`next_event`] but gives up after `timeout`.  Used by tests and
    /// shutdown paths that must not block forever.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<Event> {
        let (mutex, cond) = &*self.inner;
        let give_up = Instant::now() + timeout;
        let mut state = mutex.lock().expect("queue poisoned");
        loop {
            let next_deadline = state.fire_due_timers(Instant::now());
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= give_up {
                return None;
            }
            let mut wait_until = give_up;
            if let Some(deadline) = next_deadline {
                wait_until = wait_until.min(deadline);
            }
            state = cond
                .wait_timeout(state, wait_until.saturating_duration_since(now))
                .expect("queue poisoned")
                .0;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.inner.0.lock().expect("queue poisoned")
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

type Handler = Rc<RefCell<dyn FnMut(&Event)>>;

/// Handler registry keyed by `(event kind, token)`.
///
/// Loop-thread-only (deliberately `!Send`).  Clones share the same table, so
/// components can keep a handle and add or remove their registrations at any
/// point, including from inside a running handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    map: Rc<RefCell<HashMap<(EventKind, Token), Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    /// Registers `handler` for events of `kind` targeting `token`, replacing
    /// any previous registration for that pair.
    pub fn register<F>(&self, kind: EventKind, token: Token, handler: F)
    where
        F: FnMut(&Event) + 'static,
    {
        self.map
            .borrow_mut()
            .insert((kind, token), Rc::new(RefCell::new(handler)));
    }

    /// Removes a registration.  Returns `false` if none existed.
    pub fn unregister(&self, kind: EventKind, token: Token) -> bool {
        self.map.borrow_mut().remove(&(kind, token)).is_some()
    }

    /// Removes every registration targeting `token`.
    pub fn unregister_target(&self, token: Token) {
        self.map.borrow_mut().retain(|(_, t), _| *t != token);
    }

    fn lookup(&self, kind: EventKind, token: Token) -> Option<Handler> {
        self.map.borrow().get(&(kind, token)).cloned()
    }
}

/// Pulls events off the queue and delivers them to registered handlers.
pub struct Dispatcher {
    queue: EventQueue,
    handlers: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(queue: EventQueue) -> Dispatcher {
        Dispatcher {
            queue,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// A shared handle to the handler table.
    pub fn handlers(&self) -> HandlerRegistry {
        self.handlers.clone()
    }

    /// Delivers one event.  Returns `false` when no handler matched and the
    /// event was discarded.
    pub fn dispatch(&self, event: &Event) -> bool {
        match self.handlers.lookup(event.kind, event.target) {
            Some(handler) => {
                // The map borrow is released before the call, so the handler
                // may freely register or unregister.
                (handler.borrow_mut())(event);
                true
            }
            None => {
                tracing::trace!(kind = ?event.kind, target = ?event.target, "discarding unhandled event");
                false
            }
        }
    }

    /// Runs the dispatch loop until a quit event is popped.
    pub fn run(&self) {
        loop {
            let event = self.queue.next_event();
            if event.kind == EventKind::Quit {
                return;
            }
            self.dispatch(&event);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
