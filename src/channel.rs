// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Client Seam
//!
//! The transport never talks to a broker client directly. It asks an
//! [`AmqpFactory`] for an [`AmqpConnection`], opens an [`AmqpChannel`] on it
//! and drives every declare, publish, get, ack and nack through that channel.
//! The lapin-backed implementation lives in [`crate::client`]; tests plug in
//! mocks or an in-memory broker instead.

use crate::{
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    flags::Flags,
    message::{BrokerMessage, MessageAttributes},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::time::Duration;

/// Creates broker connections for a [`crate::connection::Connection`].
#[cfg_attr(test, mockall::automock)]
pub trait AmqpFactory: Send + Sync {
    /// Builds an unopened connection for the given settings.
    fn create_connection(&self, config: &ConnectionConfig) -> Box<dyn AmqpConnection>;
}

/// A broker connection that channels are opened on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    /// Opens a connection owned by this instance.
    async fn connect(&mut self) -> Result<(), AmqpError>;

    /// Opens a connection, or reuses one already open in this process for
    /// the same broker.
    async fn pconnect(&mut self) -> Result<(), AmqpError>;

    /// Opens a new channel on the open connection.
    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>, AmqpError>;
}

/// One broker channel.
///
/// Queue and exchange objects are not cached by the transport: each call
/// carries the definition it acts upon.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Whether the channel can still be used.
    fn is_connected(&self) -> bool;

    /// Switches the channel into publisher-confirm mode.
    async fn confirm_select(&self) -> Result<(), AmqpError>;

    /// Waits until every publish since the last call is confirmed.
    async fn wait_for_confirm(&self, timeout: Duration) -> Result<(), AmqpError>;

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares a queue and returns the number of messages it holds.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<u32, AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        flags: Flags,
        attributes: &MessageAttributes,
    ) -> Result<(), AmqpError>;

    /// Fetches one message without auto-ack, `None` when the queue is empty.
    async fn get(&self, queue: &str) -> Result<Option<BrokerMessage>, AmqpError>;

    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Rejects a delivery; [`Flags::REQUEUE`] puts it back on the queue.
    async fn nack(&self, queue: &str, delivery_tag: u64, flags: Flags) -> Result<(), AmqpError>;

    async fn purge(&self, queue: &str) -> Result<(), AmqpError>;
}
