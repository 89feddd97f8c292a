//! The supervisor context object
//!
//! A [`Supervisor`] is created once when the privileged context starts and
//! passed to whatever needs it. It owns the service registry and the
//! dispatch loops of every attached client context.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::config::SupervisorConfig;
use crate::context::Context;
use crate::dispatch::RequestDispatcher;
use crate::error::{Error, Result};
use crate::link::Connection;
use crate::requestor::ServiceRequestor;
use crate::service::{Service, ServiceRegistry};
use crate::session::SessionOptions;

struct ClientLoop {
    client: Context,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    context: Context,
    config: SupervisorConfig,
    registry: Arc<ServiceRegistry>,
    dispatcher: RequestDispatcher,
    clients: Mutex<Vec<ClientLoop>>,
}

impl Supervisor {
    /// Create a supervisor with a fresh supervisor context
    pub fn new(config: SupervisorConfig) -> Self {
        Self::build(Context::supervisor("supervisor"), config)
    }

    /// Create a supervisor for an existing context identity
    pub fn with_context(context: Context, config: SupervisorConfig) -> Result<Self> {
        if !context.is_supervisor() {
            return Err(Error::ConfigError(format!(
                "{context} is not a supervisor context"
            )));
        }
        Ok(Self::build(context, config))
    }

    fn build(context: Context, config: SupervisorConfig) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let dispatcher = RequestDispatcher::new(
            Arc::clone(&registry),
            context.clone(),
            SessionOptions::from(&config),
        );
        tracing::info!(context = %context, "supervisor started");
        Self {
            context,
            config,
            registry,
            dispatcher,
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn register_service(&self, service: Arc<dyn Service>) {
        self.registry.register_service(service);
    }

    /// Attach a client context and start its dispatch loop
    ///
    /// The returned requestor holds the client side of the new control
    /// connection and is meant to be moved into the client context.
    pub fn attach_client(&self, client: &Context) -> Result<ServiceRequestor> {
        let (server_side, client_side) = Connection::pair(&self.context, client);
        let handle = self.dispatcher.spawn(server_side, client.clone())?;

        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ClientLoop {
                client: client.clone(),
                handle,
            });
        tracing::info!(client = %client, "client attached");

        Ok(ServiceRequestor::new(
            client.clone(),
            client_side,
            SessionOptions::from(&self.config),
        ))
    }

    /// Number of attached clients whose dispatch loop is still running
    pub fn active_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| !c.handle.is_finished())
            .count()
    }

    /// Stop every started service; later requests are refused
    pub fn shutdown(&self) {
        tracing::info!(context = %self.context, "supervisor shutting down");
        self.registry.shutdown();
    }

    /// Wait until every attached client has closed its control connection
    pub fn join_clients(&self) {
        let clients = std::mem::take(
            &mut *self.clients.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for ClientLoop { client, handle } in clients {
            if handle.join().is_err() {
                tracing::warn!(client = %client, "dispatch loop panicked");
            }
        }
    }
}
