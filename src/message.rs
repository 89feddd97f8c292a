//! Messages carried by links
//!
//! A message is exactly one of: a byte payload, a UTF-8 string, or a link
//! endpoint. Sending a message that carries an endpoint moves the endpoint
//! to the receiving context.

use std::fmt;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};
use crate::link::{Endpoint, LinkReceiver, LinkSender};

/// Discriminant of a [`Message`], used in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Data,
    Text,
    Link,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Data => f.write_str("data"),
            MessageKind::Text => f.write_str("text"),
            MessageKind::Link => f.write_str("link"),
        }
    }
}

/// A single message. Extraction consumes it.
#[derive(Debug)]
pub enum Message {
    Data(Bytes),
    Text(String),
    Link(Endpoint),
}

impl Message {
    pub fn data(data: impl Into<Bytes>) -> Self {
        Message::Data(data.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Message::Text(text.into())
    }

    pub fn link(endpoint: impl Into<Endpoint>) -> Self {
        Message::Link(endpoint.into())
    }

    /// Encode a value as a MessagePack data message
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Message::Data(rmp_serde::to_vec(value)?.into()))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Data(_) => MessageKind::Data,
            Message::Text(_) => MessageKind::Text,
            Message::Link(_) => MessageKind::Link,
        }
    }

    pub fn into_data(self) -> Result<Bytes> {
        match self {
            Message::Data(data) => Ok(data),
            other => Err(other.mismatch(MessageKind::Data)),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            Message::Text(text) => Ok(text),
            other => Err(other.mismatch(MessageKind::Text)),
        }
    }

    pub fn into_endpoint(self) -> Result<Endpoint> {
        match self {
            Message::Link(endpoint) => Ok(endpoint),
            other => Err(other.mismatch(MessageKind::Link)),
        }
    }

    pub fn into_sender(self) -> Result<LinkSender> {
        match self.into_endpoint()? {
            Endpoint::Sender(sender) => Ok(sender),
            Endpoint::Receiver(_) => Err(Error::violation(
                "message",
                "expected the send end of a link, got the receive end",
            )),
        }
    }

    pub fn into_receiver(self) -> Result<LinkReceiver> {
        match self.into_endpoint()? {
            Endpoint::Receiver(receiver) => Ok(receiver),
            Endpoint::Sender(_) => Err(Error::violation(
                "message",
                "expected the receive end of a link, got the send end",
            )),
        }
    }

    /// Decode a MessagePack data message
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let data = self.into_data()?;
        Ok(rmp_serde::from_slice(&data)?)
    }

    fn mismatch(&self, expected: MessageKind) -> Error {
        Error::violation(
            "message",
            format!("expected {expected} message, got {}", self.kind()),
        )
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Data(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Data(data.into())
    }
}

impl From<Endpoint> for Message {
    fn from(endpoint: Endpoint) -> Self {
        Message::Link(endpoint)
    }
}
