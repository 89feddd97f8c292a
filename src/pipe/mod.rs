//! Named pipes between contexts
//!
//! [`PipeService`] is a service that introduces a pipe server and a pipe
//! client living in different contexts. The broker never relays pipe
//! traffic: once both sides are introduced it hands each of them one end of
//! two fresh links and steps out.
//!
//! ```text
//! server                     broker                        client
//!   |-- BindServer ------------>|                             |
//!   |<----------------- Bound --|                             |
//!   |-- AcceptServer ---------->|                             |
//!   |<------------ accept link -|                             |
//!   |                           |<------------- BindClient ---|
//!   |<= Incoming, c2s rx, s2c tx|                             |
//!   |                           |-- Connected, s2c rx, c2s tx>|
//!   |<================= pipe traffic ========================>|
//! ```

mod client;
mod protocol;
mod service;

pub use client::{PipeClient, PipeConnection, PipeServer};
pub use protocol::{PIPE_SERVICE_ID, PipeVersion};
pub use service::PipeService;
