use std::fmt;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::link::{Connection, LinkReceiver, LinkSender};
use crate::message::Message;
use crate::service::{ServiceConnection, ServiceHandle, ServiceRegistry};
use crate::session::{
    END_SESSION, LINKS_RECEIVED, RequestStatus, START_SESSION, SessionOptions, expect_marker,
};

/// Steps of the supervisor side, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    WaitBegin,
    WaitServiceId,
    LookupAndSendStatus,
    SendServiceToClientLink,
    SendClientToServiceLink,
    WaitAck,
    WaitEnd,
    Done,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::WaitBegin => "wait for session start",
            ServerState::WaitServiceId => "wait for service id",
            ServerState::LookupAndSendStatus => "lookup and send status",
            ServerState::SendServiceToClientLink => "send service-to-client link",
            ServerState::SendClientToServiceLink => "send client-to-service link",
            ServerState::WaitAck => "wait for links received",
            ServerState::WaitEnd => "wait for session end",
            ServerState::Done => "done",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a completed session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The connection was handed to the service
    Delivered { service_id: String },
    /// No such service; the client was sent an error status
    NotFound { service_id: String },
}

/// Links created for an accepted request, split by owner
struct PendingConnection {
    handle: ServiceHandle,
    service_side: Connection,
    client_receiver: Option<LinkReceiver>,
    client_sender: Option<LinkSender>,
}

/// One service request handled in the supervisor context
pub struct ServerSession<'a> {
    control: &'a Connection,
    registry: &'a ServiceRegistry,
    supervisor: &'a Context,
    client: &'a Context,
    options: &'a SessionOptions,
    state: ServerState,
}

impl<'a> ServerSession<'a> {
    pub fn new(
        control: &'a Connection,
        registry: &'a ServiceRegistry,
        supervisor: &'a Context,
        client: &'a Context,
        options: &'a SessionOptions,
    ) -> Self {
        Self {
            control,
            registry,
            supervisor,
            client,
            options,
            state: ServerState::WaitBegin,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Run the session to completion
    ///
    /// `first` is the message that woke the dispatch loop; it must be the
    /// session start marker.
    pub fn handle(mut self, first: Message) -> Result<SessionOutcome> {
        let mut first = Some(first);
        let mut service_id = String::new();
        let mut pending: Option<PendingConnection> = None;

        loop {
            match self.state {
                ServerState::WaitBegin => {
                    let msg = match first.take() {
                        Some(msg) => msg,
                        None => self.receive()?,
                    };
                    expect_marker(msg, START_SESSION, self.state.as_str())?;
                    self.state = ServerState::WaitServiceId;
                }
                ServerState::WaitServiceId => {
                    service_id = self
                        .receive()?
                        .into_text()
                        .map_err(|_| {
                            Error::violation(self.state.as_str(), "service id must be text")
                        })?;
                    tracing::debug!(
                        client = %self.client,
                        service = %service_id,
                        "service requested"
                    );
                    self.state = ServerState::LookupAndSendStatus;
                }
                ServerState::LookupAndSendStatus => {
                    let lookup = self.registry.get_service(&service_id);
                    pending = match &lookup {
                        Ok(Some(handle)) => {
                            let (service_side, client_side) =
                                Connection::pair(self.supervisor, self.client);
                            let (client_sender, client_receiver) = client_side.into_parts();
                            Some(PendingConnection {
                                handle: handle.clone(),
                                service_side,
                                client_receiver: Some(client_receiver),
                                client_sender: Some(client_sender),
                            })
                        }
                        _ => None,
                    };
                    let status = if pending.is_some() {
                        RequestStatus::Ok
                    } else {
                        RequestStatus::Error
                    };

                    // The client is blocked on the status whatever the lookup did
                    self.send(Message::data(status.to_bytes().to_vec()))?;
                    lookup?;

                    if status == RequestStatus::Error {
                        tracing::debug!(
                            client = %self.client,
                            service = %service_id,
                            "service not found"
                        );
                        self.state = ServerState::Done;
                        return Ok(SessionOutcome::NotFound { service_id });
                    }
                    self.state = ServerState::SendServiceToClientLink;
                }
                ServerState::SendServiceToClientLink => {
                    let receiver = pending
                        .as_mut()
                        .and_then(|p| p.client_receiver.take())
                        .ok_or_else(|| self.missing_links())?;
                    self.send(Message::link(receiver))?;
                    self.state = ServerState::SendClientToServiceLink;
                }
                ServerState::SendClientToServiceLink => {
                    let sender = pending
                        .as_mut()
                        .and_then(|p| p.client_sender.take())
                        .ok_or_else(|| self.missing_links())?;
                    self.send(Message::link(sender))?;
                    self.state = ServerState::WaitAck;
                }
                ServerState::WaitAck => {
                    expect_marker(self.receive()?, LINKS_RECEIVED, self.state.as_str())?;
                    if let Some(PendingConnection {
                        handle,
                        service_side,
                        ..
                    }) = pending.take()
                    {
                        let connection = ServiceConnection::with_thread_prefix(
                            service_side,
                            self.options.thread_prefix(),
                        );
                        handle.accept_connection(connection);
                        tracing::debug!(
                            client = %self.client,
                            service = %service_id,
                            "connection handed to service"
                        );
                    }
                    self.state = ServerState::WaitEnd;
                }
                ServerState::WaitEnd => {
                    expect_marker(self.receive()?, END_SESSION, self.state.as_str())?;
                    self.state = ServerState::Done;
                }
                ServerState::Done => {
                    return Ok(SessionOutcome::Delivered { service_id });
                }
            }
        }
    }

    fn send(&self, msg: Message) -> Result<()> {
        self.control.send_within(msg, self.options.timeout())
    }

    fn missing_links(&self) -> Error {
        Error::violation(self.state.as_str(), "no pending connection")
    }

    fn receive(&self) -> Result<Message> {
        self.control.receive_within(self.options.timeout())
    }
}
