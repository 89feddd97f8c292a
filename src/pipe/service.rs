use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::{Context, ContextId};
use crate::error::{Error, Result};
use crate::link::{LinkId, LinkSender, link};
use crate::message::Message;
use crate::pipe::protocol::{
    Incoming, NOT_ACCEPTING, PIPE_SERVICE_ID, PipeReply, PipeRequest, PipeVersion,
};
use crate::service::{ConnectionListener, Service, ServiceConnection};

struct ServerEndpoint {
    name: String,
    version: PipeVersion,
    owner: LinkId,
    owner_context: ContextId,
    accept: Option<LinkSender>,
}

#[derive(Default)]
struct Broker {
    next_endpoint: u64,
    servers: HashMap<u64, ServerEndpoint>,
}

/// Introduces pipe servers and pipe clients living in different contexts
///
/// Registered under [`PIPE_SERVICE_ID`]. Each pipe owner talks to the broker
/// over its own service connection; bound servers are forgotten when that
/// connection closes.
pub struct PipeService {
    context: ContextId,
    broker: Arc<Mutex<Broker>>,
}

impl PipeService {
    /// Create a broker running in `context`, normally the supervisor
    pub fn new(context: &Context) -> Self {
        Self {
            context: context.id(),
            broker: Arc::new(Mutex::new(Broker::default())),
        }
    }

    /// Number of currently bound pipe servers
    pub fn server_count(&self) -> usize {
        lock(&self.broker).servers.len()
    }
}

impl Service for PipeService {
    fn id(&self) -> &str {
        PIPE_SERVICE_ID
    }

    fn stop(&self) {
        let servers = std::mem::take(&mut lock(&self.broker).servers);
        tracing::info!(servers = servers.len(), "pipe broker stopped");
    }

    fn accept_connection(&self, connection: ServiceConnection) {
        let listener = BrokerListener {
            context: self.context,
            broker: Arc::clone(&self.broker),
        };
        if let Err(e) = connection.set_listener(listener) {
            tracing::warn!(
                connection = %connection.id(),
                error = %e,
                "failed to start pipe listener"
            );
            connection.close();
        }
    }
}

fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

struct BrokerListener {
    context: ContextId,
    broker: Arc<Mutex<Broker>>,
}

impl ConnectionListener for BrokerListener {
    fn on_message(&self, connection: &ServiceConnection, msg: Message) {
        let result = msg
            .decode::<PipeRequest>()
            .and_then(|request| self.handle(connection, request));
        match result {
            Ok(()) => {}
            Err(e) if e.is_closed() => {}
            Err(e) => {
                tracing::debug!(connection = %connection.id(), error = %e, "pipe request failed");
                let reply = match e {
                    Error::Pipe(reason) => PipeReply::fail(reason),
                    other => PipeReply::fail(other.to_string()),
                };
                if let Err(e) = Message::encode(&reply).and_then(|m| connection.send(m)) {
                    tracing::debug!(
                        connection = %connection.id(),
                        error = %e,
                        "could not report failure"
                    );
                }
            }
        }
    }

    fn on_connection_closed(&self, connection: &ServiceConnection) {
        let owner = connection.id();
        let mut broker = lock(&self.broker);
        let before = broker.servers.len();
        broker.servers.retain(|_, server| server.owner != owner);
        let removed = before - broker.servers.len();
        if removed > 0 {
            tracing::debug!(connection = %owner, removed, "pipe owner gone, servers removed");
        }
    }
}

impl BrokerListener {
    fn handle(&self, connection: &ServiceConnection, request: PipeRequest) -> Result<()> {
        match request {
            PipeRequest::BindServer { name, version } => {
                let version: PipeVersion = version.parse()?;
                let endpoint_id = self.bind_server(connection, name, version);
                connection.send(Message::encode(&PipeReply::Bound { endpoint_id })?)
            }
            PipeRequest::AcceptServer { endpoint_id } => {
                self.accept_server(connection, endpoint_id)
            }
            PipeRequest::BindClient { name, version } => {
                self.bind_client(connection, &name, &version)
            }
            PipeRequest::CloseServer { endpoint_id } => {
                let removed = {
                    let mut broker = lock(&self.broker);
                    let owned = broker
                        .servers
                        .get(&endpoint_id)
                        .is_some_and(|server| server.owner == connection.id());
                    if owned {
                        broker.servers.remove(&endpoint_id)
                    } else {
                        None
                    }
                };
                let Some(server) = removed else {
                    return Err(Error::Pipe(format!("no pipe server #{endpoint_id}")));
                };
                tracing::debug!(endpoint = endpoint_id, name = %server.name, "pipe server closed");
                // dropping the endpoint closes a pending accept link
                drop(server);
                connection.send(Message::encode(&PipeReply::Closed)?)
            }
        }
    }

    fn bind_server(
        &self,
        connection: &ServiceConnection,
        name: String,
        version: PipeVersion,
    ) -> u64 {
        let mut broker = lock(&self.broker);
        broker.next_endpoint += 1;
        let endpoint_id = broker.next_endpoint;
        tracing::debug!(
            endpoint = endpoint_id,
            name = %name,
            version = %version,
            "pipe server bound"
        );
        broker.servers.insert(
            endpoint_id,
            ServerEndpoint {
                name,
                version,
                owner: connection.id(),
                owner_context: connection.peer(),
                accept: None,
            },
        );
        endpoint_id
    }

    fn accept_server(&self, connection: &ServiceConnection, endpoint_id: u64) -> Result<()> {
        let receiver = {
            let mut broker = lock(&self.broker);
            let server = broker
                .servers
                .get_mut(&endpoint_id)
                .filter(|server| server.owner == connection.id())
                .ok_or_else(|| Error::Pipe(format!("no pipe server #{endpoint_id}")))?;
            let (sender, receiver) = link(self.context, server.owner_context);
            server.accept = Some(sender);
            receiver
        };
        connection.send(Message::link(receiver))
    }

    fn bind_client(&self, connection: &ServiceConnection, name: &str, version: &str) -> Result<()> {
        let requested: PipeVersion = version.parse()?;

        let (accept, server_context, server_version) = {
            let mut broker = lock(&self.broker);
            let server = broker
                .servers
                .values_mut()
                .filter(|s| s.name == name && s.version.satisfies(&requested))
                .max_by_key(|s| (s.accept.as_ref().is_some_and(LinkSender::is_open), s.version))
                .ok_or_else(|| {
                    Error::Pipe(format!("no pipe server '{name}' for version {requested}"))
                })?;
            let accept = server
                .accept
                .take()
                .ok_or_else(|| Error::Pipe(NOT_ACCEPTING.to_string()))?;
            (accept, server.owner_context, server.version)
        };

        let client_context = connection.peer();
        let (to_client, from_server) = link(server_context, client_context);
        let (to_server, from_client) = link(client_context, server_context);

        let delivered = accept
            .send(Message::encode(&Incoming {
                requested_version: version.to_string(),
            })?)
            .and_then(|()| accept.send(Message::link(from_client)))
            .and_then(|()| accept.send(Message::link(to_client)));
        accept.close();
        if delivered.is_err() {
            return Err(Error::Pipe(NOT_ACCEPTING.to_string()));
        }

        tracing::debug!(
            name = %name,
            server = %server_version,
            client = %client_context,
            "pipe connected"
        );
        connection.send(Message::encode(&PipeReply::Connected {
            server_version: server_version.to_string(),
        })?)?;
        connection.send(Message::link(from_server))?;
        connection.send(Message::link(to_server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Connection;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Harness {
        service: PipeService,
        client: ServiceConnection,
    }

    fn harness() -> Harness {
        let supervisor = Context::supervisor("ams");
        let app = Context::task("app");
        let service = PipeService::new(&supervisor);
        let (service_side, client_side) = Connection::pair(&supervisor, &app);
        service.accept_connection(ServiceConnection::new(service_side));
        Harness {
            service,
            client: ServiceConnection::new(client_side),
        }
    }

    fn call(client: &ServiceConnection, request: PipeRequest) -> Result<PipeReply> {
        client.send(Message::encode(&request).unwrap()).unwrap();
        PipeReply::from_message(client.receive().unwrap())
    }

    #[test]
    fn test_bind_and_close_server() {
        let h = harness();
        let reply = call(
            &h.client,
            PipeRequest::BindServer {
                name: "clock".into(),
                version: "1.0".into(),
            },
        )
        .unwrap();
        let PipeReply::Bound { endpoint_id } = reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert_eq!(h.service.server_count(), 1);

        let reply = call(&h.client, PipeRequest::CloseServer { endpoint_id }).unwrap();
        assert_eq!(reply, PipeReply::Closed);
        assert_eq!(h.service.server_count(), 0);

        let err = call(&h.client, PipeRequest::CloseServer { endpoint_id }).unwrap_err();
        assert!(matches!(err, Error::Pipe(_)));
    }

    #[test]
    fn test_malformed_version_fails_request() {
        let h = harness();
        let err = call(
            &h.client,
            PipeRequest::BindServer {
                name: "clock".into(),
                version: "one".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Pipe(reason) if reason.contains("malformed")));
        assert_eq!(h.service.server_count(), 0);
    }

    #[test]
    fn test_client_fails_when_server_not_accepting() {
        let h = harness();
        call(
            &h.client,
            PipeRequest::BindServer {
                name: "clock".into(),
                version: "1.2".into(),
            },
        )
        .unwrap();

        let err = call(
            &h.client,
            PipeRequest::BindClient {
                name: "clock".into(),
                version: "1.0".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Pipe(reason) if reason == NOT_ACCEPTING));

        let err = call(
            &h.client,
            PipeRequest::BindClient {
                name: "clock".into(),
                version: "2.0".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Pipe(reason) if reason.contains("no pipe server")));
    }

    #[test]
    fn test_owner_close_removes_servers() {
        let h = harness();
        call(
            &h.client,
            PipeRequest::BindServer {
                name: "clock".into(),
                version: "1.0".into(),
            },
        )
        .unwrap();
        assert_eq!(h.service.server_count(), 1);

        h.client.close();
        let deadline = Instant::now() + Duration::from_secs(5);
        while h.service.server_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(h.service.server_count(), 0);
    }
}
