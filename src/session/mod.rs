//! Service request sessions
//!
//! A session is one run of the handshake that turns a request for a named
//! service into a dedicated connection. Both sides step through a fixed
//! sequence over the control connection:
//!
//! ```text
//! client                                   supervisor
//!   -- text  "Starting service request" -->
//!   -- text  <service id>               -->
//!   <-- data [status: i32 BE, 0 = ok]   --   lookup; on error the session ends
//!   <-- link receive end, service->client --
//!   <-- link send end,    client->service --
//!   -- text  "Links received"           -->   service gets its end here
//!   -- text  "Finishing service request" -->
//! ```
//!
//! The acknowledgement guarantees the service never sees its end of the
//! connection before the client holds both of its own.

mod client;
mod server;

pub use client::{ClientSession, ClientState};
pub use server::{ServerSession, ServerState, SessionOutcome};

use std::time::Duration;

use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::service::DEFAULT_THREAD_PREFIX;

pub const START_SESSION: &str = "Starting service request";
pub const END_SESSION: &str = "Finishing service request";
pub const LINKS_RECEIVED: &str = "Links received";

/// Status of a service lookup, sent as a 4-byte big-endian integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Ok,
    Error,
}

impl RequestStatus {
    pub fn code(self) -> i32 {
        match self {
            RequestStatus::Ok => 0,
            RequestStatus::Error => 1,
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.code().to_be_bytes()
    }

    /// `None` for anything that is not a well-formed known status
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let code: [u8; 4] = data.try_into().ok()?;
        match i32::from_be_bytes(code) {
            0 => Some(RequestStatus::Ok),
            1 => Some(RequestStatus::Error),
            _ => None,
        }
    }
}

/// Settings shared by both sides of a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    timeout: Option<Duration>,
    thread_prefix: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            thread_prefix: DEFAULT_THREAD_PREFIX.to_string(),
        }
    }
}

impl SessionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn thread_prefix(&self) -> &str {
        &self.thread_prefix
    }
}

impl From<&SupervisorConfig> for SessionOptions {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            timeout: config.handshake_timeout(),
            thread_prefix: config.thread_name_prefix().to_string(),
        }
    }
}

/// Check that `msg` is the text `marker`
fn expect_marker(msg: Message, marker: &str, state: &'static str) -> Result<()> {
    let kind = msg.kind();
    let Message::Text(text) = msg else {
        return Err(Error::violation(
            state,
            format!("expected {marker:?}, got a {kind} message"),
        ));
    };
    if text != marker {
        return Err(Error::violation(
            state,
            format!("expected {marker:?}, got {text:?}"),
        ));
    }
    Ok(())
}
