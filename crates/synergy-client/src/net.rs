//! Network plumbing for the client.
//!
//! All socket work runs on tokio tasks; results are marshalled into the
//! event queue so the state machine never blocks.  Every event carries the
//! session number of the connect attempt that produced it – the client bumps
//! the session on each new attempt and ignores stragglers from old ones.
//!
//! Outbound messages go through an unbounded channel drained by a writer
//! task, so handlers on the loop thread never wait on the socket.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use synergy_core::protocol::{encode_frame, FrameReader, Message};
use synergy_core::{Event, EventKind, EventPayload, EventQueue, Token};

/// Network failures.  All of them close the current connection and are
/// retryable; retry policy lives with the supervisor.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no addresses for {0}")]
    NoAddresses(String),
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),
    #[error("connection closed by server")]
    Closed,
}

/// Spawns an address-resolution task for `host:port`.
///
/// Posts `Resolved` on success or `ConnectFailed` (bad host, retryable) on
/// failure, both stamped with `session`.
pub fn resolve(
    rt: &tokio::runtime::Handle,
    host: String,
    port: u16,
    session: u64,
    queue: EventQueue,
    target: Token,
) {
    rt.spawn(async move {
        let lookup_result = tokio::net::lookup_host((host.clone(), port)).await;
        match lookup_result {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if addrs.is_empty() {
                    queue.post(Event::with_payload(
                        EventKind::ConnectFailed,
                        target,
                        EventPayload::ConnectFailed {
                            session,
                            detail: NetworkError::NoAddresses(host).to_string(),
                        },
                    ));
                    return;
                }
                debug!("resolved {host} to {} address(es)", addrs.len());
                queue.post(Event::with_payload(
                    EventKind::Resolved,
                    target,
                    EventPayload::Resolved { session, addrs },
                ));
            }
            Err(source) => {
                queue.post(Event::with_payload(
                    EventKind::ConnectFailed,
                    target,
                    EventPayload::ConnectFailed {
                        session,
                        detail: NetworkError::Resolve { host, source }.to_string(),
                    },
                ));
            }
        }
    });
}

/// One TCP connection attempt and, if it succeeds, the framed message pump.
///
/// Dropping the `Connection` aborts the reader and closes the writer channel,
/// which ends the writer task and releases the socket.
pub struct Connection {
    session: u64,
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    reader: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Starts connecting to `addr`.  Posts `Connected` once the stream is up
    /// and `Message` events as frames decode; any failure becomes
    /// `ConnectFailed` (before the stream is up) or `Disconnected` (after).
    pub fn open(
        rt: &tokio::runtime::Handle,
        addr: SocketAddr,
        session: u64,
        queue: EventQueue,
        target: Token,
    ) -> Connection {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let reader = rt.spawn(run_connection(addr, session, queue, target, out_rx, rt.clone()));
        Connection {
            session,
            out_tx,
            reader,
        }
    }

    /// The connect attempt this connection belongs to.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Queues a message for the writer task.  Frames are flushed in the
    /// order they were sent.
    pub fn send(&self, msg: &Message) {
        trace!("send {:?}", std::mem::discriminant(msg));
        if self.out_tx.send(encode_frame(msg)).is_err() {
            warn!("dropping outbound message: connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn run_connection(
    addr: SocketAddr,
    session: u64,
    queue: EventQueue,
    target: Token,
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    rt: tokio::runtime::Handle,
) {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(source) => {
            queue.post(Event::with_payload(
                EventKind::ConnectFailed,
                target,
                EventPayload::ConnectFailed {
                    session,
                    detail: NetworkError::Connect { addr, source }.to_string(),
                },
            ));
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {e}");
    }
    let (mut read_half, mut write_half) = stream.into_split();

    // Writer: drain the outbound channel until every sender is gone.
    rt.spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                debug!("write error: {e}");
                break;
            }
        }
    });

    queue.post(Event::with_payload(
        EventKind::Connected,
        target,
        EventPayload::Connected { session },
    ));

    // Reader: feed raw bytes through the restartable frame decoder.
    let mut frames = FrameReader::new();
    let mut buf = [0u8; 8192];
    let (detail, retryable) = loop {
        match read_half.read(&mut buf).await {
            Ok(0) => break (NetworkError::Closed.to_string(), true),
            Ok(n) => {
                frames.feed(&buf[..n]);
                loop {
                    match frames.next_message() {
                        Ok(Some(message)) => {
                            queue.post(Event::with_payload(
                                EventKind::Message,
                                target,
                                EventPayload::Message {
                                    session,
                                    message: Box::new(message),
                                },
                            ));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            queue.post(Event::with_payload(
                                EventKind::Disconnected,
                                target,
                                EventPayload::Disconnected {
                                    session,
                                    detail: format!("protocol error: {e}"),
                                    retryable: e.is_retryable(),
                                },
                            ));
                            return;
                        }
                    }
                }
            }
            Err(e) => break (NetworkError::Read(e).to_string(), true),
        }
    };
    queue.post(Event::with_payload(
        EventKind::Disconnected,
        target,
        EventPayload::Disconnected {
            session,
            detail,
            retryable,
        },
    ));
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime")
    }

    fn wait_for(queue: &EventQueue, kind: EventKind) -> Event {
        loop {
            let event = queue
                .next_event_timeout(Duration::from_secs(5))
                .expect("event within timeout");
            if event.kind == kind {
                return event;
            }
        }
    }

    #[test]
    fn test_resolve_loopback_posts_resolved() {
        let rt = runtime();
        let queue = EventQueue::new();
        let token = queue.new_token();

        resolve(rt.handle(), "127.0.0.1".to_string(), 24800, 1, queue.clone(), token);

        let event = wait_for(&queue, EventKind::Resolved);
        let EventPayload::Resolved { session, addrs } = event.payload else {
            panic!("wrong payload");
        };
        assert_eq!(session, 1);
        assert_eq!(addrs[0].port(), 24800);
    }

    #[test]
    fn test_resolve_bogus_host_posts_connect_failed() {
        let rt = runtime();
        let queue = EventQueue::new();
        let token = queue.new_token();

        resolve(
            rt.handle(),
            "host.invalid.".to_string(),
            24800,
            7,
            queue.clone(),
            token,
        );

        let event = wait_for(&queue, EventKind::ConnectFailed);
        let EventPayload::ConnectFailed { session, .. } = event.payload else {
            panic!("wrong payload");
        };
        assert_eq!(session, 7);
    }

    #[test]
    fn test_connect_to_refused_port_posts_connect_failed() {
        let rt = runtime();
        let queue = EventQueue::new();
        let token = queue.new_token();

        // Port 1 on loopback refuses immediately on any sane test host.
        let _conn = Connection::open(
            rt.handle(),
            "127.0.0.1:1".parse().unwrap(),
            3,
            queue.clone(),
            token,
        );

        let event = wait_for(&queue, EventKind::ConnectFailed);
        assert!(matches!(
            event.payload,
            EventPayload::ConnectFailed { session: 3, .. }
        ));
    }

    #[test]
    fn test_connection_pumps_messages_both_ways() {
        let rt = runtime();
        let queue = EventQueue::new();
        let token = queue.new_token();

        // A tiny in-process server: accept, send a greeting, echo-read.
        let listener =
            rt.block_on(async { tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap() });
        let addr = listener.local_addr().unwrap();
        let server = rt.spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(&encode_frame(&Message::own_hello()))
                .await
                .unwrap();
            // Read back one frame from the client.
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await.unwrap();
            let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
            stream.read_exact(&mut payload).await.unwrap();
            payload
        });

        let conn = Connection::open(rt.handle(), addr, 5, queue.clone(), token);

        let event = wait_for(&queue, EventKind::Connected);
        assert!(matches!(
            event.payload,
            EventPayload::Connected { session: 5 }
        ));

        let event = wait_for(&queue, EventKind::Message);
        let EventPayload::Message { session, message } = event.payload else {
            panic!("wrong payload");
        };
        assert_eq!(session, 5);
        assert_eq!(*message, Message::Hello { major: 1, minor: 6 });

        conn.send(&Message::NoOp);
        let payload = rt.block_on(server).unwrap();
        assert_eq!(&payload, b"CNOP");
    }

    #[test]
    fn test_server_close_posts_retryable_disconnect() {
        let rt = runtime();
        let queue = EventQueue::new();
        let token = queue.new_token();

        let listener =
            rt.block_on(async { tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap() });
        let addr = listener.local_addr().unwrap();
        rt.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let _conn = Connection::open(rt.handle(), addr, 2, queue.clone(), token);

        let event = wait_for(&queue, EventKind::Disconnected);
        let EventPayload::Disconnected {
            session, retryable, ..
        } = event.payload
        else {
            panic!("wrong payload");
        };
        assert_eq!(session, 2);
        assert!(retryable);
    }
}
