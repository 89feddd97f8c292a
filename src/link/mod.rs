//! Links: unidirectional rendezvous channels between two contexts
//!
//! A link has exactly one send end ([`LinkSender`]) and one receive end
//! ([`LinkReceiver`]). Neither end can be cloned; handing an end to another
//! context means moving it inside a [`Message::Link`](crate::Message).
//!
//! `send` blocks until the peer has taken the message or the link is closed.
//! Closing either end (explicitly or by dropping it) wakes every blocked
//! operation on both ends with [`Error::ConnectionClosed`].

mod connection;

pub use connection::Connection;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::context::ContextId;
use crate::error::{Error, Result};
use crate::message::Message;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a link, shared by both of its ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Create a link carrying messages from `from` to `to`
pub fn link(from: impl Into<ContextId>, to: impl Into<ContextId>) -> (LinkSender, LinkReceiver) {
    let (from, to) = (from.into(), to.into());
    let core = Arc::new(LinkCore {
        id: LinkId(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed)),
        from,
        to,
        state: Mutex::new(LinkState::default()),
        cond: Condvar::new(),
    });
    tracing::trace!(link = %core.id, from = %from, to = %to, "link created");
    (
        LinkSender {
            core: Arc::clone(&core),
        },
        LinkReceiver { core },
    )
}

#[derive(Default)]
struct LinkState {
    slot: Option<Message>,
    posted: u64,
    taken: u64,
    closed: bool,
}

struct LinkCore {
    id: LinkId,
    from: ContextId,
    to: ContextId,
    state: Mutex<LinkState>,
    cond: Condvar,
}

enum Wait {
    Ready,
    TimedOut,
}

impl LinkCore {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while `blocked` holds, up to `deadline`
    fn wait_while<'a>(
        &self,
        mut guard: MutexGuard<'a, LinkState>,
        deadline: Option<Instant>,
        mut blocked: impl FnMut(&LinkState) -> bool,
    ) -> (MutexGuard<'a, LinkState>, Wait) {
        loop {
            if !blocked(&guard) {
                return (guard, Wait::Ready);
            }
            match deadline {
                None => {
                    guard = self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (guard, Wait::TimedOut);
                    }
                    guard = self
                        .cond
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn send(&self, msg: Message, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let kind = msg.kind();

        let guard = self.lock();
        let (mut guard, wait) =
            self.wait_while(guard, deadline, |s| s.slot.is_some() && !s.closed);
        if guard.closed {
            return Err(Error::ConnectionClosed);
        }
        if let Wait::TimedOut = wait {
            return Err(Error::Timeout);
        }

        guard.slot = Some(msg);
        guard.posted += 1;
        let ticket = guard.posted;
        self.cond.notify_all();

        let (mut guard, wait) =
            self.wait_while(guard, deadline, |s| s.taken < ticket && !s.closed);
        if guard.taken >= ticket {
            tracing::trace!(link = %self.id, kind = %kind, "message delivered");
            return Ok(());
        }

        // Not taken: pull the message back. It is dropped outside the lock
        // because it may carry an end of this very link.
        let withdrawn = guard.slot.take();
        self.cond.notify_all();
        drop(guard);
        drop(withdrawn);

        match wait {
            Wait::TimedOut => Err(Error::Timeout),
            Wait::Ready => Err(Error::ConnectionClosed),
        }
    }

    /// `Ok(None)` means `cancel` was raised; a message still in the slot is
    /// left for the next receiver
    fn receive(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&AtomicBool>,
    ) -> Result<Option<Message>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let cancelled = || cancel.is_some_and(|c| c.load(Ordering::SeqCst));

        let guard = self.lock();
        let (mut guard, wait) = self.wait_while(guard, deadline, |s| {
            s.slot.is_none() && !s.closed && !cancelled()
        });
        if cancelled() {
            return Ok(None);
        }
        if guard.closed {
            return Err(Error::ConnectionClosed);
        }
        if let Some(msg) = guard.slot.take() {
            guard.taken += 1;
            self.cond.notify_all();
            tracing::trace!(link = %self.id, kind = %msg.kind(), "message received");
            return Ok(Some(msg));
        }
        match wait {
            Wait::TimedOut => Err(Error::Timeout),
            Wait::Ready => Ok(None),
        }
    }

    fn close(&self) {
        let mut guard = self.lock();
        if !guard.closed {
            guard.closed = true;
            tracing::trace!(link = %self.id, "link closed");
        }
        self.cond.notify_all();
    }

    fn wake(&self) {
        let _guard = self.lock();
        self.cond.notify_all();
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }
}

/// Send end of a link
pub struct LinkSender {
    core: Arc<LinkCore>,
}

impl LinkSender {
    /// Send a message, blocking until the peer takes it
    pub fn send(&self, msg: Message) -> Result<()> {
        self.core.send(msg, None)
    }

    /// Send a message, giving up after `timeout`
    ///
    /// On timeout the message is withdrawn and dropped.
    pub fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<()> {
        self.core.send(msg, Some(timeout))
    }

    pub(crate) fn send_within(&self, msg: Message, timeout: Option<Duration>) -> Result<()> {
        self.core.send(msg, timeout)
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    pub fn id(&self) -> LinkId {
        self.core.id
    }

    /// Context that may send on this link
    pub fn source(&self) -> ContextId {
        self.core.from
    }

    /// Context that receives from this link
    pub fn destination(&self) -> ContextId {
        self.core.to
    }
}

impl Drop for LinkSender {
    fn drop(&mut self) {
        self.core.close();
    }
}

impl fmt::Debug for LinkSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSender")
            .field("id", &self.core.id)
            .field("from", &self.core.from)
            .field("to", &self.core.to)
            .finish()
    }
}

/// Receive end of a link
pub struct LinkReceiver {
    core: Arc<LinkCore>,
}

impl LinkReceiver {
    /// Receive the next message, blocking until one arrives
    pub fn receive(&self) -> Result<Message> {
        self.receive_within(None)
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<Message> {
        self.receive_within(Some(timeout))
    }

    pub(crate) fn receive_within(&self, timeout: Option<Duration>) -> Result<Message> {
        match self.core.receive(timeout, None)? {
            Some(msg) => Ok(msg),
            // Without a cancel flag the wait only ends on a message, close or timeout
            None => Err(Error::Timeout),
        }
    }

    /// Receive unless `cancel` is raised first; see [`LinkReceiver::wake`]
    pub(crate) fn receive_cancellable(&self, cancel: &AtomicBool) -> Result<Option<Message>> {
        self.core.receive(None, Some(cancel))
    }

    /// Wake blocked receivers so they re-check their cancel flag
    pub(crate) fn wake(&self) {
        self.core.wake();
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    pub fn id(&self) -> LinkId {
        self.core.id
    }

    pub fn source(&self) -> ContextId {
        self.core.from
    }

    pub fn destination(&self) -> ContextId {
        self.core.to
    }
}

impl Drop for LinkReceiver {
    fn drop(&mut self) {
        self.core.close();
    }
}

impl fmt::Debug for LinkReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkReceiver")
            .field("id", &self.core.id)
            .field("from", &self.core.from)
            .field("to", &self.core.to)
            .finish()
    }
}

/// Either end of a link, as carried by a link message
#[derive(Debug)]
pub enum Endpoint {
    Sender(LinkSender),
    Receiver(LinkReceiver),
}

impl Endpoint {
    pub fn is_open(&self) -> bool {
        match self {
            Endpoint::Sender(s) => s.is_open(),
            Endpoint::Receiver(r) => r.is_open(),
        }
    }

    pub fn id(&self) -> LinkId {
        match self {
            Endpoint::Sender(s) => s.id(),
            Endpoint::Receiver(r) => r.id(),
        }
    }
}

impl From<LinkSender> for Endpoint {
    fn from(sender: LinkSender) -> Self {
        Endpoint::Sender(sender)
    }
}

impl From<LinkReceiver> for Endpoint {
    fn from(receiver: LinkReceiver) -> Self {
        Endpoint::Receiver(receiver)
    }
}
