use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::context::ContextId;
use crate::error::{Error, Result};
use crate::link::{Connection, LinkId};
use crate::message::Message;

pub(crate) const DEFAULT_THREAD_PREFIX: &str = "isolink";

/// Callbacks driven by a connection's listener thread
pub trait ConnectionListener: Send + Sync + 'static {
    fn on_message(&self, connection: &ServiceConnection, msg: Message);

    /// Called once when the connection closes; the listener thread then exits
    fn on_connection_closed(&self, connection: &ServiceConnection);
}

struct ListenerTask {
    cancel: Arc<AtomicBool>,
}

struct Inner {
    connection: Connection,
    thread_prefix: String,
    listener: Mutex<Option<ListenerTask>>,
}

/// An established connection between a client and a service
///
/// Handles are cheap to clone within one context. Any transport failure
/// tears the whole connection down and is reported as
/// [`Error::ConnectionClosed`].
#[derive(Clone)]
pub struct ServiceConnection {
    inner: Arc<Inner>,
}

impl ServiceConnection {
    pub fn new(connection: Connection) -> Self {
        Self::with_thread_prefix(connection, DEFAULT_THREAD_PREFIX)
    }

    pub(crate) fn with_thread_prefix(connection: Connection, prefix: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                thread_prefix: prefix.to_string(),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Send a message, blocking until the peer receives it
    pub fn send(&self, msg: Message) -> Result<()> {
        self.inner.connection.send(msg).map_err(|e| self.fail(e))
    }

    /// Receive the next message, blocking until one arrives
    pub fn receive(&self) -> Result<Message> {
        self.inner.connection.receive().map_err(|e| self.fail(e))
    }

    /// Install a listener, cancelling any listener installed before
    ///
    /// The previous listener thread stops without seeing
    /// `on_connection_closed`. A message it already took is still delivered
    /// to it, never to both.
    pub fn set_listener(&self, listener: impl ConnectionListener) -> Result<()> {
        let mut slot = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            self.cancel(previous);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let connection = self.clone();
        let flag = Arc::clone(&cancel);
        thread::Builder::new()
            .name(format!("{}-listener-{}", self.inner.thread_prefix, self.id()))
            .spawn(move || run_listener(connection, listener, flag))?;

        *slot = Some(ListenerTask { cancel });
        Ok(())
    }

    /// Stop the installed listener, if any
    pub fn clear_listener(&self) {
        let previous = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            self.cancel(previous);
        }
    }

    pub fn close(&self) {
        self.inner.connection.close();
    }

    pub fn is_open(&self) -> bool {
        self.inner.connection.is_open()
    }

    /// Identifies this connection by its outgoing link
    pub fn id(&self) -> LinkId {
        self.inner.connection.sender().id()
    }

    /// Context on the other end of this connection
    pub fn peer(&self) -> ContextId {
        self.inner.connection.receiver().source()
    }

    fn cancel(&self, task: ListenerTask) {
        task.cancel.store(true, Ordering::SeqCst);
        self.inner.connection.receiver().wake();
        tracing::debug!(connection = %self.id(), "listener cancelled");
    }

    fn fail(&self, err: Error) -> Error {
        tracing::debug!(connection = %self.id(), error = %err, "tearing down service connection");
        self.close();
        Error::ConnectionClosed
    }
}

fn run_listener(
    connection: ServiceConnection,
    listener: impl ConnectionListener,
    cancel: Arc<AtomicBool>,
) {
    let receiver = connection.inner.connection.receiver();
    while !cancel.load(Ordering::SeqCst) {
        match receiver.receive_cancellable(&cancel) {
            Ok(Some(msg)) => listener.on_message(&connection, msg),
            Ok(None) => break,
            Err(e) => {
                connection.fail(e);
                listener.on_connection_closed(&connection);
                break;
            }
        }
    }
}

impl fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("connection", &self.inner.connection)
            .finish()
    }
}
