// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Transport
//!
//! The entry point most applications use: one [`Connection`] shared by a
//! sender and a receiver, created from a DSN by [`AmqpTransportFactory`].

use crate::{
    channel::AmqpFactory,
    client::LapinFactory,
    connection::Connection,
    envelope::Envelope,
    errors::AmqpError,
    receiver::AmqpReceiver,
    sender::AmqpSender,
    serializer::Serializer,
};
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct AmqpTransport {
    connection: Arc<Connection>,
    sender: AmqpSender,
    receiver: AmqpReceiver,
}

impl AmqpTransport {
    pub fn new(connection: Connection, serializer: Arc<dyn Serializer>) -> AmqpTransport {
        let connection = Arc::new(connection);

        AmqpTransport {
            sender: AmqpSender::new(connection.clone(), serializer.clone()),
            receiver: AmqpReceiver::new(connection.clone(), serializer),
            connection,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn send(&self, envelope: Envelope) -> Result<Envelope, AmqpError> {
        self.sender.send(envelope).await
    }

    pub fn get(&self) -> BoxStream<'_, Result<Envelope, AmqpError>> {
        self.receiver.poll()
    }

    pub fn get_from_queues(&self, queue_names: Vec<String>) -> BoxStream<'_, Result<Envelope, AmqpError>> {
        self.receiver.poll_queues(queue_names)
    }

    pub async fn ack(&self, envelope: &Envelope) -> Result<(), AmqpError> {
        self.receiver.ack(envelope).await
    }

    pub async fn reject(&self, envelope: &Envelope) -> Result<(), AmqpError> {
        self.receiver.reject(envelope).await
    }

    /// Declares the whole topology on the broker.
    pub async fn setup(&self) -> Result<(), AmqpError> {
        self.connection.setup().await
    }

    pub async fn message_count(&self) -> Result<u64, AmqpError> {
        self.receiver.message_count().await
    }
}

/// Builds transports for `amqp://` and `amqps://` DSNs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpTransportFactory;

impl AmqpTransportFactory {
    pub fn new() -> AmqpTransportFactory {
        AmqpTransportFactory
    }

    pub fn supports(&self, dsn: &str) -> bool {
        dsn.starts_with("amqp://") || dsn.starts_with("amqps://")
    }

    /// A transport talking to the broker through lapin.
    pub fn create_transport(
        &self,
        dsn: &str,
        options: &Value,
        serializer: Arc<dyn Serializer>,
    ) -> Result<AmqpTransport, AmqpError> {
        self.create_transport_with(dsn, options, serializer, Arc::new(LapinFactory::new()))
    }

    /// A transport talking to the broker through the given client factory.
    pub fn create_transport_with(
        &self,
        dsn: &str,
        options: &Value,
        serializer: Arc<dyn Serializer>,
        factory: Arc<dyn AmqpFactory>,
    ) -> Result<AmqpTransport, AmqpError> {
        let connection = Connection::from_dsn(dsn, options, factory)?;
        debug!(
            uri = connection.config().connection.redacted_uri(),
            queues = connection.get_queue_names().join(","),
            "amqp transport created"
        );

        Ok(AmqpTransport::new(connection, serializer))
    }
}
