use std::time::Duration;

use crate::context::ContextId;
use crate::error::Result;
use crate::link::{LinkReceiver, LinkSender, link};
use crate::message::Message;

/// A send link and a receive link held by one context
///
/// The peer holds the mirror image: this side's send link is the peer's
/// receive link and vice versa.
#[derive(Debug)]
pub struct Connection {
    sender: LinkSender,
    receiver: LinkReceiver,
}

impl Connection {
    pub fn new(sender: LinkSender, receiver: LinkReceiver) -> Self {
        Self { sender, receiver }
    }

    /// Create a fresh pair of links between two contexts
    ///
    /// Returns `(a_side, b_side)`.
    pub fn pair(a: impl Into<ContextId>, b: impl Into<ContextId>) -> (Connection, Connection) {
        let (a, b) = (a.into(), b.into());
        let (a_to_b_tx, a_to_b_rx) = link(a, b);
        let (b_to_a_tx, b_to_a_rx) = link(b, a);
        (
            Connection::new(a_to_b_tx, b_to_a_rx),
            Connection::new(b_to_a_tx, a_to_b_rx),
        )
    }

    pub fn send(&self, msg: Message) -> Result<()> {
        self.sender.send(msg)
    }

    pub fn receive(&self) -> Result<Message> {
        self.receiver.receive()
    }

    pub(crate) fn send_within(&self, msg: Message, timeout: Option<Duration>) -> Result<()> {
        self.sender.send_within(msg, timeout)
    }

    pub(crate) fn receive_within(&self, timeout: Option<Duration>) -> Result<Message> {
        self.receiver.receive_within(timeout)
    }

    pub fn sender(&self) -> &LinkSender {
        &self.sender
    }

    pub fn receiver(&self) -> &LinkReceiver {
        &self.receiver
    }

    /// Open only while both links are open
    pub fn is_open(&self) -> bool {
        self.sender.is_open() && self.receiver.is_open()
    }

    pub fn close(&self) {
        self.sender.close();
        self.receiver.close();
    }

    pub fn into_parts(self) -> (LinkSender, LinkReceiver) {
        (self.sender, self.receiver)
    }
}
