// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Transport
//!
//! Every failure the transport can report is an [`AmqpError`]. Broker-client
//! errors are translated into one of these variants at the adapter boundary,
//! so callers only ever deal with this single taxonomy. [`AmqpError::kind`]
//! groups the variants into the four families callers branch on.

use std::time::Duration;
use thiserror::Error;

/// Message used whenever the broker connection cannot be established.
///
/// It is deliberately fixed: it must never carry any part of the DSN.
pub const CONNECTION_FAILURE_MESSAGE: &str =
    "Could not connect to the AMQP server. Please verify the provided DSN.";

/// Represents errors that can occur during AMQP transport operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Invalid DSN, unsupported scheme or missing TLS material
    #[error("{0}")]
    ConfigurationError(String),

    /// An option value that cannot be used as given
    #[error("{0}")]
    InvalidArgumentError(String),

    /// Error establishing a connection to the broker
    #[error("{}", CONNECTION_FAILURE_MESSAGE)]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error switching the channel into publisher-confirm mode
    #[error("failure to enable publisher confirms")]
    ConfirmSelectError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing a message on the given exchange
    #[error("failure to publish on exchange `{0}`")]
    PublishingError(String),

    /// The broker did not confirm a publish in time
    #[error("publish was not confirmed within {0:?}")]
    ConfirmTimeoutError(Duration),

    /// The broker negatively confirmed a publish
    #[error("publish was rejected by the broker")]
    PublishNackError,

    /// Error fetching a message from the given queue
    #[error("failure to get a message from queue `{0}`")]
    GetMessageError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error purging the given queue
    #[error("failure to purge queue `{0}`")]
    PurgeQueueError(String),

    /// Error turning a broker message back into an envelope
    #[error("failure to decode message: {0}")]
    DecodeError(String),

    /// Error turning an envelope into a broker message
    #[error("failure to encode message: {0}")]
    EncodeError(String),

    /// The queue is not part of the configured topology
    #[error("queue `{0}` is not configured on this connection")]
    UnknownQueueError(String),

    /// Ack or reject of an envelope that was not received from AMQP
    #[error("no `AmqpReceivedStamp` stamp found on the envelope")]
    MissingReceivedStampError,
}

/// The error families callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at construction time, never retried.
    Configuration,
    /// Fatal at construction time, never retried.
    InvalidArgument,
    /// Broker failure; the caller may retry or leave the message unacked.
    Transport,
    /// Misuse of the API.
    Logic,
}

impl AmqpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::ConfigurationError(_) => ErrorKind::Configuration,
            AmqpError::InvalidArgumentError(_) => ErrorKind::InvalidArgument,
            AmqpError::UnknownQueueError(_) | AmqpError::MissingReceivedStampError => {
                ErrorKind::Logic
            }
            _ => ErrorKind::Transport,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}
