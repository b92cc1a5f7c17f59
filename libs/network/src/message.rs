//! Acknowledged publishes.

use crate::frame::Frame;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Consistency hint carried with a publish and forwarded unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cnss {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

/// Outbound message envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub data: Bytes,
    pub custom: Bytes,
    pub cnss: Cnss,
}

impl Message {
    pub fn new(topic: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn with_custom(mut self, custom: impl Into<Bytes>) -> Self {
        self.custom = custom.into();
        self
    }

    pub fn with_cnss(mut self, cnss: Cnss) -> Self {
        self.cnss = cnss;
        self
    }
}

/// Wire string sent when an inbound message is dropped without an answer
pub const DROPPED_UNACKED: &str = "message dropped unacknowledged";

/// A received publish waiting for its acknowledgement.
///
/// Exactly one of [`done`](Self::done) or [`error`](Self::error) answers the
/// publisher. Dropping the message unanswered answers with an error.
#[derive(Debug)]
pub struct InboundMessage {
    message: Message,
    stream_id: u64,
    message_id: u64,
    acker: Option<UnboundedSender<Frame>>,
}

impl InboundMessage {
    pub(crate) fn new(
        message: Message,
        stream_id: u64,
        message_id: u64,
        outbound: UnboundedSender<Frame>,
    ) -> Self {
        Self {
            message,
            stream_id,
            message_id,
            acker: Some(outbound),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    pub fn data(&self) -> &Bytes {
        &self.message.data
    }

    pub fn custom(&self) -> &Bytes {
        &self.message.custom
    }

    pub fn cnss(&self) -> Cnss {
        self.message.cnss
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Acknowledge success
    pub fn done(mut self) {
        self.answer(None);
    }

    /// Acknowledge failure; the publisher sees `err` as a remote error
    pub fn error(mut self, err: impl std::fmt::Display) {
        self.answer(Some(err.to_string()));
    }

    fn answer(&mut self, error: Option<String>) {
        if let Some(acker) = self.acker.take() {
            let _ = acker.send(Frame::Ack {
                stream_id: self.stream_id,
                message_id: self.message_id,
                error,
            });
        }
    }
}

impl Drop for InboundMessage {
    fn drop(&mut self) {
        self.answer(Some(DROPPED_UNACKED.to_string()));
    }
}
