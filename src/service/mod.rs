//! Services hosted by the supervisor context
//!
//! A [`Service`] is a named handler that is started lazily the first time a
//! client asks for it and then receives every [`ServiceConnection`] a client
//! establishes with it.
//!
//! # Example
//!
//! ```rust,ignore
//! use isolink::{Message, Service, ServiceConnection};
//!
//! struct Clock;
//!
//! impl Service for Clock {
//!     fn id(&self) -> &str { "clock" }
//!
//!     fn accept_connection(&self, connection: ServiceConnection) {
//!         std::thread::spawn(move || {
//!             let _ = connection.send(Message::text(now()));
//!         });
//!     }
//! }
//! ```

mod connection;
mod registry;

pub use connection::{ConnectionListener, ServiceConnection};
pub(crate) use connection::DEFAULT_THREAD_PREFIX;
pub use registry::{ServiceHandle, ServiceRegistry};

use crate::error::Result;

/// A named handler living in the supervisor context
pub trait Service: Send + Sync + 'static {
    /// Unique ID clients request this service by
    fn id(&self) -> &str;

    /// Called on the first lookup
    ///
    /// An error leaves the service unstarted and the next lookup calls
    /// `start` again, so it may run several times until it succeeds.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Called once, when the service is replaced or the registry shuts down
    fn stop(&self) {}

    /// Take ownership of a freshly established client connection
    ///
    /// Runs on the requesting client's dispatch thread, so implementations
    /// should hand the connection off quickly (for example with
    /// [`ServiceConnection::set_listener`]). Calls for one service are
    /// serialized.
    fn accept_connection(&self, connection: ServiceConnection);
}
