//! isolink - service connections between isolated execution contexts
//!
//! A privileged supervisor context hosts named [`Service`]s. Every other
//! context (a task) talks to the supervisor over a control [`Connection`]
//! and can ask it for a connection to any registered service. The request
//! is a short handshake on the control connection, after which the client
//! and the service share a fresh pair of links that nobody else holds.
//!
//! Links are unbuffered rendezvous channels: a send completes only when
//! the other side takes the message. A link end can itself be sent as a
//! message, which is how connections are handed from one context to
//! another.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use isolink::{Context, Message, Service, ServiceConnection, Supervisor, SupervisorConfig};
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     fn id(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn accept_connection(&self, connection: ServiceConnection) {
//!         std::thread::spawn(move || {
//!             while let Ok(msg) = connection.receive() {
//!                 if connection.send(msg).is_err() {
//!                     break;
//!                 }
//!             }
//!         });
//!     }
//! }
//!
//! fn main() -> isolink::Result<()> {
//!     let supervisor = Supervisor::new(SupervisorConfig::default());
//!     supervisor.register_service(Arc::new(Echo));
//!
//!     let requestor = supervisor.attach_client(&Context::task("app"))?;
//!     let echo = requestor.request_service("echo")?.expect("echo is registered");
//!     echo.send(Message::text("hello"))?;
//!     assert_eq!(echo.receive()?.into_text()?, "hello");
//!
//!     requestor.close();
//!     supervisor.join_clients();
//!     supervisor.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Pipes
//!
//! The [`pipe`] module ships a ready-made service that introduces named pipe
//! servers to pipe clients in other contexts. Register a [`PipeService`] and
//! use [`PipeClient`] from the tasks.

mod config;
mod context;
mod dispatch;
mod error;
mod link;
mod message;
pub mod pipe;
mod requestor;
mod service;
pub mod session;
mod supervisor;

pub use config::{SupervisorConfig, SupervisorConfigBuilder};
pub use context::{Context, ContextId, ContextKind};
pub use dispatch::RequestDispatcher;
pub use error::{Error, Result};
pub use link::{Connection, Endpoint, LinkId, LinkReceiver, LinkSender, link};
pub use message::{Message, MessageKind};
pub use pipe::{PipeClient, PipeConnection, PipeServer, PipeService};
pub use requestor::ServiceRequestor;
pub use service::{ConnectionListener, Service, ServiceConnection, ServiceHandle, ServiceRegistry};
pub use session::{RequestStatus, SessionOptions};
pub use supervisor::Supervisor;
