//! Per-client dispatch loop
//!
//! Every client context attached to a supervisor gets one dispatch thread.
//! The thread waits on the client's control connection, runs one server
//! session per request, and exits when the control connection closes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::link::Connection;
use crate::service::ServiceRegistry;
use crate::session::{ServerSession, SessionOptions, SessionOutcome};

/// Serves service requests arriving on control connections
#[derive(Clone)]
pub struct RequestDispatcher {
    registry: Arc<ServiceRegistry>,
    supervisor: Context,
    options: SessionOptions,
}

impl RequestDispatcher {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        supervisor: Context,
        options: SessionOptions,
    ) -> Self {
        Self {
            registry,
            supervisor,
            options,
        }
    }

    /// Start a dispatch thread for `client`, which owns the other side of `control`
    pub fn spawn(&self, control: Connection, client: Context) -> Result<JoinHandle<()>> {
        let dispatcher = self.clone();
        let handle = thread::Builder::new()
            .name(format!(
                "{}-dispatch-{}",
                self.options.thread_prefix(),
                client.id().as_u64()
            ))
            .spawn(move || dispatcher.serve(control, &client))?;
        Ok(handle)
    }

    /// Serve requests from `client` until its control connection closes
    ///
    /// Sessions run one at a time. A session that breaks the protocol is
    /// abandoned and the loop waits for the next one.
    pub fn serve(&self, control: Connection, client: &Context) {
        tracing::info!(client = %client, "dispatch loop started");

        loop {
            let first = match control.receive() {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(client = %client, error = %e, "control connection ended");
                    break;
                }
            };

            let session = ServerSession::new(
                &control,
                &self.registry,
                &self.supervisor,
                client,
                &self.options,
            );
            match session.handle(first) {
                Ok(SessionOutcome::Delivered { service_id }) => {
                    tracing::debug!(client = %client, service = %service_id, "session complete");
                }
                Ok(SessionOutcome::NotFound { service_id }) => {
                    tracing::debug!(client = %client, service = %service_id, "session refused");
                }
                Err(Error::ConnectionClosed) => {
                    tracing::debug!(client = %client, "control connection closed mid-session");
                    break;
                }
                Err(Error::Timeout) => {
                    // The stream position is unknown after a timeout
                    tracing::warn!(
                        client = %client,
                        "session timed out, dropping control connection"
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(client = %client, error = %e, "session abandoned");
                }
            }
        }

        control.close();
        tracing::info!(client = %client, "dispatch loop exited");
    }
}
