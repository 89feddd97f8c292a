use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::link::{Connection, LinkReceiver};
use crate::message::Message;
use crate::pipe::protocol::{Incoming, PIPE_SERVICE_ID, PipeReply, PipeRequest, PipeVersion};
use crate::requestor::ServiceRequestor;
use crate::service::ServiceConnection;

/// A client context's connection to the pipe broker
///
/// Clones share one broker connection; request/reply exchanges on it are
/// serialized.
#[derive(Clone)]
pub struct PipeClient {
    connection: ServiceConnection,
    exchange: Arc<Mutex<()>>,
}

impl PipeClient {
    /// Connect to the pipe broker through the supervisor
    pub fn connect(requestor: &ServiceRequestor) -> Result<Self> {
        let connection = requestor
            .request_service(PIPE_SERVICE_ID)?
            .ok_or_else(|| Error::ServiceUnavailable(PIPE_SERVICE_ID.to_string()))?;
        Ok(Self::new(connection))
    }

    /// Wrap an already established broker connection
    pub fn new(connection: ServiceConnection) -> Self {
        Self {
            connection,
            exchange: Arc::new(Mutex::new(())),
        }
    }

    fn begin(&self, request: &PipeRequest) -> Result<MutexGuard<'_, ()>> {
        let guard = self.exchange.lock().unwrap_or_else(PoisonError::into_inner);
        self.connection.send(Message::encode(request)?)?;
        Ok(guard)
    }

    /// Bind a pipe server that clients can reach as `name`
    pub fn bind_server(&self, name: &str, version: &str) -> Result<PipeServer> {
        let version: PipeVersion = version.parse()?;
        let _exchange = self.begin(&PipeRequest::BindServer {
            name: name.to_string(),
            version: version.to_string(),
        })?;
        match PipeReply::from_message(self.connection.receive()?)? {
            PipeReply::Bound { endpoint_id } => {
                tracing::debug!(name = %name, endpoint = endpoint_id, "pipe server bound");
                Ok(PipeServer {
                    client: self.clone(),
                    endpoint_id,
                    name: name.to_string(),
                    version,
                    accepting: Mutex::new(None),
                    accept_turn: Mutex::new(()),
                })
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Connect to a server bound as `name` that satisfies `version`
    pub fn connect_to(&self, name: &str, version: &str) -> Result<PipeConnection> {
        let requested: PipeVersion = version.parse()?;
        let _exchange = self.begin(&PipeRequest::BindClient {
            name: name.to_string(),
            version: version.to_string(),
        })?;
        let server_version = match PipeReply::from_message(self.connection.receive()?)? {
            PipeReply::Connected { server_version } => server_version.parse()?,
            other => return Err(unexpected(&other)),
        };
        let inbound = self.connection.receive()?.into_receiver()?;
        let outbound = self.connection.receive()?.into_sender()?;
        Ok(PipeConnection {
            connection: Connection::new(outbound, inbound),
            name: name.to_string(),
            server_version,
            requested_version: requested,
        })
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Close the broker connection; servers bound through it go away
    pub fn close(&self) {
        self.connection.close();
    }
}

fn unexpected(reply: &PipeReply) -> Error {
    Error::violation("pipe", format!("unexpected broker reply {reply:?}"))
}

impl fmt::Debug for PipeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeClient")
            .field("connection", &self.connection)
            .finish()
    }
}

/// A bound pipe server
pub struct PipeServer {
    client: PipeClient,
    endpoint_id: u64,
    name: String,
    version: PipeVersion,
    accepting: Mutex<Option<Arc<LinkReceiver>>>,
    accept_turn: Mutex<()>,
}

impl fmt::Debug for PipeServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeServer")
            .field("endpoint_id", &self.endpoint_id)
            .field("name", &self.name)
            .field("version", &format_args!("{}", self.version))
            .finish_non_exhaustive()
    }
}

impl PipeServer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> PipeVersion {
        self.version
    }

    /// Wait for the next client
    ///
    /// Blocks until a client connects or [`close`](Self::close) is called,
    /// which fails the pending call with [`Error::ConnectionClosed`].
    pub fn accept(&self) -> Result<PipeConnection> {
        let _turn = self.accept_turn.lock().unwrap_or_else(PoisonError::into_inner);

        let accept_link = {
            let _exchange = self.client.begin(&PipeRequest::AcceptServer {
                endpoint_id: self.endpoint_id,
            })?;
            match self.client.connection.receive()? {
                msg @ Message::Link(_) => Arc::new(msg.into_receiver()?),
                // a failure reply surfaces as Error::Pipe here
                other => return Err(unexpected(&PipeReply::from_message(other)?)),
            }
        };
        *self.accepting() = Some(Arc::clone(&accept_link));

        let result = receive_client(&accept_link);
        self.accepting().take();
        let (connection, requested_version) = result?;
        tracing::debug!(name = %self.name, requested = %requested_version, "pipe client accepted");
        Ok(PipeConnection {
            connection,
            name: self.name.clone(),
            server_version: self.version,
            requested_version,
        })
    }

    /// Unbind the server, aborting a pending [`accept`](Self::accept)
    pub fn close(&self) -> Result<()> {
        if let Some(pending) = self.accepting().take() {
            pending.close();
        }
        let _exchange = self.client.begin(&PipeRequest::CloseServer {
            endpoint_id: self.endpoint_id,
        })?;
        match PipeReply::from_message(self.client.connection.receive()?)? {
            PipeReply::Closed => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn accepting(&self) -> MutexGuard<'_, Option<Arc<LinkReceiver>>> {
        self.accepting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn receive_client(accept_link: &LinkReceiver) -> Result<(Connection, PipeVersion)> {
    let incoming: Incoming = accept_link.receive()?.decode()?;
    let requested = incoming.requested_version.parse()?;
    let inbound = accept_link.receive()?.into_receiver()?;
    let outbound = accept_link.receive()?.into_sender()?;
    Ok((Connection::new(outbound, inbound), requested))
}

/// One end of an established pipe
#[derive(Debug)]
pub struct PipeConnection {
    connection: Connection,
    name: String,
    server_version: PipeVersion,
    requested_version: PipeVersion,
}

impl PipeConnection {
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.connection.send(Message::data(data))
    }

    pub fn receive(&self) -> Result<Bytes> {
        self.connection.receive()?.into_data()
    }

    pub fn close(&self) {
        self.connection.close();
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_version(&self) -> PipeVersion {
        self.server_version
    }

    /// Version the client asked for when connecting
    pub fn requested_version(&self) -> PipeVersion {
        self.requested_version
    }
}
