use std::fmt;

use crate::error::{Error, Result};
use crate::link::{Connection, LinkReceiver, LinkSender};
use crate::message::Message;
use crate::service::ServiceConnection;
use crate::session::{END_SESSION, LINKS_RECEIVED, RequestStatus, START_SESSION, SessionOptions};

/// Steps of the requesting side, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Begin,
    SendServiceId,
    WaitForStatus,
    WaitForServiceToClientLink,
    WaitForClientToServiceLink,
    SendAck,
    EndSession,
    Done,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Begin => "begin",
            ClientState::SendServiceId => "send service id",
            ClientState::WaitForStatus => "wait for status",
            ClientState::WaitForServiceToClientLink => "wait for service-to-client link",
            ClientState::WaitForClientToServiceLink => "wait for client-to-service link",
            ClientState::SendAck => "send links received",
            ClientState::EndSession => "end session",
            ClientState::Done => "done",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One service request driven from a client context
///
/// Consumed by [`ClientSession::request`]; a new session is created for
/// every request.
pub struct ClientSession<'a> {
    control: &'a Connection,
    options: &'a SessionOptions,
    state: ClientState,
    service_to_client: Option<LinkReceiver>,
    client_to_service: Option<LinkSender>,
}

impl<'a> ClientSession<'a> {
    pub fn new(control: &'a Connection, options: &'a SessionOptions) -> Self {
        Self {
            control,
            options,
            state: ClientState::Begin,
            service_to_client: None,
            client_to_service: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Ask the supervisor for a connection to `service_id`
    ///
    /// `Ok(None)` means the supervisor has no such service.
    pub fn request(mut self, service_id: &str) -> Result<Option<ServiceConnection>> {
        loop {
            match self.state {
                ClientState::Begin => {
                    self.send(Message::text(START_SESSION))?;
                    self.state = ClientState::SendServiceId;
                }
                ClientState::SendServiceId => {
                    self.send(Message::text(service_id))?;
                    self.state = ClientState::WaitForStatus;
                }
                ClientState::WaitForStatus => {
                    let data = self
                        .receive()?
                        .into_data()
                        .map_err(|e| self.violation(e))?;
                    match RequestStatus::from_bytes(&data) {
                        Some(RequestStatus::Ok) => {
                            self.state = ClientState::WaitForServiceToClientLink;
                        }
                        status => {
                            tracing::debug!(
                                service = %service_id,
                                ?status,
                                "service request refused"
                            );
                            self.state = ClientState::Done;
                            return Ok(None);
                        }
                    }
                }
                ClientState::WaitForServiceToClientLink => {
                    let receiver = self
                        .receive()?
                        .into_receiver()
                        .map_err(|e| self.violation(e))?;
                    if !receiver.is_open() {
                        return Err(Error::violation(
                            self.state.as_str(),
                            "received link is closed",
                        ));
                    }
                    self.service_to_client = Some(receiver);
                    self.state = ClientState::WaitForClientToServiceLink;
                }
                ClientState::WaitForClientToServiceLink => {
                    let sender = self
                        .receive()?
                        .into_sender()
                        .map_err(|e| self.violation(e))?;
                    if !sender.is_open() {
                        return Err(Error::violation(
                            self.state.as_str(),
                            "received link is closed",
                        ));
                    }
                    self.client_to_service = Some(sender);
                    self.state = ClientState::SendAck;
                }
                ClientState::SendAck => {
                    self.send(Message::text(LINKS_RECEIVED))?;
                    self.state = ClientState::EndSession;
                }
                ClientState::EndSession => {
                    self.send(Message::text(END_SESSION))?;
                    self.state = ClientState::Done;
                }
                ClientState::Done => {
                    let (Some(receiver), Some(sender)) =
                        (self.service_to_client.take(), self.client_to_service.take())
                    else {
                        return Err(Error::violation(
                            self.state.as_str(),
                            "session ended without links",
                        ));
                    };
                    tracing::debug!(service = %service_id, "service connection established");
                    let connection = Connection::new(sender, receiver);
                    return Ok(Some(ServiceConnection::with_thread_prefix(
                        connection,
                        self.options.thread_prefix(),
                    )));
                }
            }
        }
    }

    fn send(&self, msg: Message) -> Result<()> {
        self.control.send_within(msg, self.options.timeout())
    }

    fn receive(&self) -> Result<Message> {
        self.control.receive_within(self.options.timeout())
    }

    /// Re-attribute a message-level violation to the current state
    fn violation(&self, err: Error) -> Error {
        match err {
            Error::ProtocolViolation { detail, .. } => {
                Error::violation(self.state.as_str(), detail)
            }
            other => other,
        }
    }
}
