//! Blocking command transport over a persistent simulator connection.
//!
//! One reader thread owns the receive half of the stream; any number of
//! foreground callers share [`Transport::command`], serialized by a call
//! lock so the half-duplex wire discipline holds: one request outstanding,
//! answered by exactly one reply. Replies travel through a single-slot
//! mailbox guarded by a mutex and condition variable; connection-level
//! failures poison the mailbox permanently.

use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::proto::{self, FrameError, Reply};

/// Why the connection stopped serving replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostReason {
    /// The peer closed the stream.
    Eof,
    /// Local shutdown via [`Transport::close`].
    Closed,
    /// Transport-level read failure.
    Io(String),
    /// Correlation lost: malformed or unsolicited reply.
    Protocol(String),
}

impl fmt::Display for LostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LostReason::Eof => write!(f, "peer closed the connection"),
            LostReason::Closed => write!(f, "transport closed"),
            LostReason::Io(err) => write!(f, "read failed: {err}"),
            LostReason::Protocol(detail) => write!(f, "protocol violation: {detail}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("port value {0} is out of range (1-65535)")]
    PortOutOfRange(u32),

    #[error("not connected")]
    NotConnected,

    #[error("connection lost: {0}")]
    ConnectionLost(LostReason),

    /// Application-level failure reported by the peer; the transport
    /// remains usable.
    #[error("simulator error: {0}")]
    Peer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("transport state poisoned")]
    LockPoisoned,
}

impl TransportError {
    /// Whether the transport is unusable after this error.
    pub fn is_terminal(&self) -> bool {
        match self {
            TransportError::NotConnected
            | TransportError::ConnectionLost(_)
            | TransportError::Io(_)
            | TransportError::LockPoisoned => true,
            TransportError::PortOutOfRange(_)
            | TransportError::Peer(_)
            | TransportError::Frame(_) => false,
        }
    }
}

/// Single-slot reply mailbox state: `Idle -> Pending -> Ready -> Idle`.
#[derive(Debug)]
enum Slot {
    Idle,
    Pending,
    Ready(Result<Value, String>),
}

#[derive(Debug)]
struct SlotInner {
    slot: Slot,
    /// Set once the connection can no longer serve replies; sticky. A
    /// reply deposited before death is still delivered to its caller.
    dead: Option<LostReason>,
}

/// The reply mailbox. The reader thread deposits; the one caller holding
/// the call lock consumes.
#[derive(Debug)]
struct ReplySlot {
    inner: Mutex<SlotInner>,
    ready: Condvar,
}

impl ReplySlot {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                slot: Slot::Idle,
                dead: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Mark a call in flight. Fails if the transport already died.
    fn begin(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().map_err(|_| TransportError::LockPoisoned)?;
        if let Some(reason) = &inner.dead {
            return Err(TransportError::ConnectionLost(reason.clone()));
        }
        match inner.slot {
            Slot::Idle => {
                inner.slot = Slot::Pending;
                Ok(())
            }
            // Unreachable while the call lock serializes callers.
            Slot::Pending | Slot::Ready(_) => Err(TransportError::ConnectionLost(
                LostReason::Protocol("command issued while another is pending".to_string()),
            )),
        }
    }

    /// Roll back `begin` after a local send failure.
    fn cancel(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if matches!(inner.slot, Slot::Pending) {
                inner.slot = Slot::Idle;
            }
        }
    }

    /// Block until the reader deposits a reply or a terminal error.
    fn take(&self) -> Result<Value, TransportError> {
        let mut inner = self.inner.lock().map_err(|_| TransportError::LockPoisoned)?;
        loop {
            if matches!(inner.slot, Slot::Ready(_)) {
                break;
            }
            if let Some(reason) = inner.dead.clone() {
                inner.slot = Slot::Idle;
                return Err(TransportError::ConnectionLost(reason));
            }
            inner = self
                .ready
                .wait(inner)
                .map_err(|_| TransportError::LockPoisoned)?;
        }
        match std::mem::replace(&mut inner.slot, Slot::Idle) {
            Slot::Ready(Ok(value)) => Ok(value),
            Slot::Ready(Err(message)) => Err(TransportError::Peer(message)),
            Slot::Idle | Slot::Pending => Err(TransportError::ConnectionLost(
                LostReason::Protocol("reply slot consumed out of turn".to_string()),
            )),
        }
    }

    /// Deposit one reply. Returns false when no call was pending, in which
    /// case correlation is lost and the slot has been poisoned.
    fn deposit(&self, outcome: Result<Value, String>) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.dead.is_some() {
            return false;
        }
        match inner.slot {
            Slot::Pending => {
                inner.slot = Slot::Ready(outcome);
                self.ready.notify_all();
                true
            }
            Slot::Idle | Slot::Ready(_) => {
                inner.dead = Some(LostReason::Protocol(
                    "reply received with no command pending".to_string(),
                ));
                self.ready.notify_all();
                false
            }
        }
    }

    /// Terminal transition; later poisons keep the first reason. Leaves a
    /// deposited reply in place so the waiting caller still receives it.
    fn poison(&self, reason: LostReason) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.dead.is_none() {
            inner.dead = Some(reason);
        }
        self.ready.notify_all();
    }
}

/// Blocking request/response channel to the simulator.
///
/// Construction performs the connection handshake synchronously even though
/// the connect runs on the reader thread. [`Transport::close`] is expected
/// to be called exactly once; extra calls are harmless no-ops, and `Drop`
/// closes an unclosed transport.
pub struct Transport {
    /// Serializes callers; held for the whole of `command`.
    call: Mutex<()>,
    /// Write half of the stream. `None` once closed.
    writer: Mutex<Option<TcpStream>>,
    slot: Arc<ReplySlot>,
    reader: Option<JoinHandle<()>>,
}

impl Transport {
    /// Connect to the simulator's command socket.
    ///
    /// The port is validated before any network activity. The reader thread
    /// performs the TCP connect and reports back through a one-shot channel,
    /// so this blocks until the handshake has succeeded or failed.
    pub fn connect(address: &str, port: u32) -> Result<Self, TransportError> {
        if !(1..=65535).contains(&port) {
            return Err(TransportError::PortOutOfRange(port));
        }

        let slot = Arc::new(ReplySlot::new());
        let reader_slot = Arc::clone(&slot);
        let target = format!("{address}:{port}");
        let (ready_tx, ready_rx) = channel::bounded(1);

        let handle = std::thread::Builder::new()
            .name("simlink-recv".to_string())
            .spawn(move || {
                let stream = match TcpStream::connect(&target) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = stream.set_nodelay(true);
                let writer = match stream.try_clone() {
                    Ok(writer) => writer,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(writer)).is_err() {
                    return;
                }
                reader_loop(stream, &reader_slot);
            })?;

        match ready_rx.recv() {
            Ok(Ok(writer)) => {
                debug!(address, port, "connected");
                Ok(Self {
                    call: Mutex::new(()),
                    writer: Mutex::new(Some(writer)),
                    slot,
                    reader: Some(handle),
                })
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(TransportError::Io(err))
            }
            Err(_) => {
                let _ = handle.join();
                Err(TransportError::ConnectionLost(LostReason::Io(
                    "connect thread terminated before reporting".to_string(),
                )))
            }
        }
    }

    /// Issue one command and block until its reply arrives.
    ///
    /// Concurrent callers queue on the call lock and are served in order.
    /// Peer-reported errors come back as [`TransportError::Peer`] and leave
    /// the transport usable; connection-level failures are terminal and
    /// sticky.
    pub fn command(&self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        let _call = self.call.lock().map_err(|_| TransportError::LockPoisoned)?;

        let frame = proto::encode_command(name, &arguments)?;
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| TransportError::LockPoisoned)?;
            let Some(stream) = writer.as_mut() else {
                return Err(TransportError::NotConnected);
            };
            self.slot.begin()?;
            if let Err(err) = stream.write_all(&frame) {
                self.slot.cancel();
                return Err(TransportError::Io(err));
            }
        }
        trace!(command = name, "sent");

        self.slot.take()
    }

    /// Shut the connection down and join the reader thread.
    ///
    /// Any caller blocked in [`Transport::command`] is unblocked with a
    /// terminal error; subsequent calls fail with
    /// [`TransportError::NotConnected`].
    pub fn close(&mut self) -> Result<(), TransportError> {
        let stream = {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| TransportError::LockPoisoned)?;
            writer.take()
        };
        let Some(stream) = stream else {
            return Ok(());
        };

        self.slot.poison(LostReason::Closed);
        let _ = stream.shutdown(Shutdown::Both);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        debug!("transport closed");
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Receive loop: reads reply lines until the connection dies, depositing
/// each into the slot. Every exit path poisons the slot so blocked and
/// future callers fail instead of hanging.
fn reader_loop(stream: TcpStream, slot: &ReplySlot) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                debug!("peer closed the connection");
                slot.poison(LostReason::Eof);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "read failed");
                slot.poison(LostReason::Io(err.to_string()));
                return;
            }
        }

        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let reply = match proto::decode_reply(trimmed) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "unreadable reply");
                slot.poison(LostReason::Protocol(err.to_string()));
                return;
            }
        };
        let outcome = match reply {
            Reply::Result(value) => Ok(value),
            Reply::Error(message) => Err(message),
        };
        if !slot.deposit(outcome) {
            warn!("reply arrived with no command pending");
            return;
        }
        trace!("reply delivered");
    }
}
