//! Client-side entry point for requesting services

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::link::Connection;
use crate::service::ServiceConnection;
use crate::session::{ClientSession, SessionOptions};

/// Requests services from the supervisor on behalf of one client context
///
/// Owns the client side of the control connection. Requests from several
/// threads of the same context are serialized, so sessions never interleave.
pub struct ServiceRequestor {
    context: Context,
    control: Mutex<Connection>,
    options: SessionOptions,
}

impl ServiceRequestor {
    pub fn new(context: Context, control: Connection, options: SessionOptions) -> Self {
        Self {
            context,
            control: Mutex::new(control),
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a connection to the service registered as `service_id`
    ///
    /// Returns `Ok(None)` when the supervisor has no such service. Any error
    /// leaves the control connection at an unknown point of the handshake,
    /// so it is torn down and later requests fail with
    /// [`Error::ConnectionClosed`].
    pub fn request_service(&self, service_id: &str) -> Result<Option<ServiceConnection>> {
        let control = self.lock();
        if !control.is_open() {
            return Err(Error::ConnectionClosed);
        }

        tracing::debug!(context = %self.context, service = %service_id, "requesting service");
        let result = ClientSession::new(&control, &self.options).request(service_id);
        if let Err(e) = &result {
            if !e.is_closed() {
                tracing::warn!(
                    context = %self.context,
                    service = %service_id,
                    error = %e,
                    "service request failed, closing control connection"
                );
            }
            control.close();
        }
        result
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    /// Close the control connection; the supervisor's dispatch loop for this
    /// context then exits
    pub fn close(&self) {
        self.lock().close();
    }
}
