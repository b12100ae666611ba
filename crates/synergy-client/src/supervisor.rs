//! The supervisor: owns the client lifecycle from the outside.
//!
//! Reacts to the client's `ClientConnected` / `ClientFailed` /
//! `ClientDisconnected` events, schedules reconnects on the constant retry
//! delay, surfaces status to the host process through a callback, and turns
//! fatal conditions into the quit event that ends the dispatch loop.
//!
//! Every reconnect goes through the one-shot retry timer; there is no
//! direct-reconnect shortcut, so the cadence is a steady one attempt per
//! second while the server is away.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, error, info, warn};

use synergy_core::{Event, EventKind, EventPayload, EventQueue, HandlerRegistry, Token};

use crate::client::{Client, RETRY_DELAY};

/// Coarse connection status surfaced to the host process (taskbar, syslog,
/// etc. – whatever the embedder wires in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Receives `(status, detail)` updates.
pub type StatusCallback = Box<dyn Fn(ClientStatus, &str)>;

/// Exit code for a screen that cannot be opened at all.
pub const EXIT_SCREEN_OPEN_FAILURE: i32 = 4;

pub struct Supervisor {
    inner: Rc<RefCell<SupervisorInner>>,
}

struct SupervisorInner {
    queue: EventQueue,
    registry: HandlerRegistry,
    client: Client,
    restart: bool,
    status: Option<StatusCallback>,
    retry_timer: Option<Token>,
    exit_code: i32,
    weak: Weak<RefCell<SupervisorInner>>,
}

impl Supervisor {
    /// Wires the supervisor onto `client`'s lifecycle events.
    pub fn new(
        client: Client,
        restart: bool,
        queue: &EventQueue,
        registry: &HandlerRegistry,
        status: Option<StatusCallback>,
    ) -> Supervisor {
        let client_token = client.token();
        let inner = Rc::new_cyclic(|weak| {
            RefCell::new(SupervisorInner {
                queue: queue.clone(),
                registry: registry.clone(),
                client,
                restart,
                status,
                retry_timer: None,
                exit_code: 0,
                weak: weak.clone(),
            })
        });

        for kind in [
            EventKind::ClientConnected,
            EventKind::ClientFailed,
            EventKind::ClientDisconnected,
            EventKind::ScreenError,
        ] {
            let weak = Rc::downgrade(&inner);
            registry.register(kind, client_token, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().on_event(event);
                }
            });
        }

        Supervisor { inner }
    }

    /// Kicks off the first connect attempt.
    pub fn start(&self) {
        let inner = self.inner.borrow();
        inner.report(ClientStatus::Connecting, "");
        inner.client.connect();
    }

    /// Shuts the client down after the dispatch loop ends: sends `CBYE` if a
    /// session is still up and drops every registration.
    pub fn stop(&self) {
        self.inner.borrow().client.shutdown();
    }

    /// Process exit code accumulated from fatal conditions (0 when the loop
    /// ended cleanly).
    pub fn exit_code(&self) -> i32 {
        self.inner.borrow().exit_code
    }
}

impl SupervisorInner {
    fn on_event(&mut self, event: &Event) {
        let (detail, retryable) = match &event.payload {
            EventPayload::Status { detail, retryable } => (detail.clone(), *retryable),
            _ => (String::new(), true),
        };
        match event.kind {
            EventKind::ClientConnected => {
                info!("connected to server");
                self.report(ClientStatus::Connected, "");
            }
            EventKind::ClientFailed => {
                self.report(
                    ClientStatus::Failed,
                    &format!("failed to connect to server: {detail}"),
                );
                if !self.restart || !retryable {
                    error!("failed to connect to server: {detail}");
                    self.queue.post_quit();
                } else {
                    warn!("failed to connect to server: {detail}");
                    self.schedule_retry();
                }
            }
            EventKind::ClientDisconnected => {
                info!("disconnected from server");
                self.report(ClientStatus::Disconnected, &detail);
                if !self.restart || !retryable {
                    self.queue.post_quit();
                } else {
                    self.schedule_retry();
                }
            }
            EventKind::ScreenError => {
                error!("error on screen: {detail}");
                if retryable && self.restart {
                    self.schedule_retry();
                } else {
                    self.exit_code = 1;
                    self.queue.post_quit();
                }
            }
            _ => {}
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_timer.is_some() {
            return;
        }
        debug!("retry in {} second(s)", RETRY_DELAY.as_secs());
        let timer = self.queue.new_one_shot(RETRY_DELAY);
        let weak = self.weak.clone();
        self.registry.register(EventKind::Timer, timer, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().on_retry(timer);
            }
        });
        self.retry_timer = Some(timer);
    }

    fn on_retry(&mut self, timer: Token) {
        // The one-shot deregistered itself from the queue on firing; drop the
        // handler too.
        self.registry.unregister(EventKind::Timer, timer);
        self.retry_timer = None;
        self.report(ClientStatus::Connecting, "");
        self.client.connect();
    }

    fn report(&self, status: ClientStatus, detail: &str) {
        if let Some(callback) = &self.status {
            callback(status, detail);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
