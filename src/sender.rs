// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Sender
//!
//! Turns an outbound envelope into one publish on the shared [`Connection`].

use crate::{
    connection::Connection,
    envelope::Envelope,
    errors::AmqpError,
    otel,
    serializer::Serializer,
    stamps::{AmqpReceivedStamp, AmqpStamp, DelayStamp, RedeliveryStamp},
};
use std::sync::Arc;
use tracing::debug;

pub struct AmqpSender {
    connection: Arc<Connection>,
    serializer: Arc<dyn Serializer>,
}

impl AmqpSender {
    pub fn new(connection: Arc<Connection>, serializer: Arc<dyn Serializer>) -> AmqpSender {
        AmqpSender {
            connection,
            serializer,
        }
    }

    /// Publishes the envelope and hands it back unchanged.
    ///
    /// The last [`DelayStamp`] sets the delay and the last [`AmqpStamp`] the
    /// routing. An envelope that came from AMQP keeps its broker attributes;
    /// with a [`RedeliveryStamp`] it is routed back to the queue it was
    /// received from only.
    pub async fn send(&self, envelope: Envelope) -> Result<Envelope, AmqpError> {
        let mut encoded = self.serializer.encode(&envelope)?;

        let delay_ms = envelope.last::<DelayStamp>().map_or(0, |stamp| stamp.delay);
        let mut stamp = envelope.last::<AmqpStamp>().cloned();

        if let Some(received) = envelope.last::<AmqpReceivedStamp>() {
            let retry_routing_key = envelope
                .last::<RedeliveryStamp>()
                .map(|_| received.queue_name());

            stamp = Some(AmqpStamp::from_received(
                received.message(),
                stamp.as_ref(),
                retry_routing_key,
            ));
        }

        otel::inject(&mut encoded.headers);

        debug!(
            message_type = envelope.message().kind,
            delay_ms = delay_ms,
            "sending envelope"
        );

        self.connection
            .publish(&encoded.body, &encoded.headers, delay_ms, stamp.as_ref())
            .await?;

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{AmqpChannel, AmqpConnection, MockAmqpChannel, MockAmqpConnection, MockAmqpFactory},
        envelope::Message,
        flags::Flags,
        message::{BrokerMessage, MessageAttributes},
        serializer::JsonSerializer,
    };
    use serde_json::Value;

    fn sender(dsn: &str, channel: MockAmqpChannel) -> AmqpSender {
        let mut conn = MockAmqpConnection::new();
        conn.expect_connect().returning(|| Ok(()));
        conn.expect_create_channel()
            .return_once(move || Ok(Box::new(channel) as Box<dyn AmqpChannel>));

        let mut factory = MockAmqpFactory::new();
        factory
            .expect_create_connection()
            .return_once(move |_| Box::new(conn) as Box<dyn AmqpConnection>);

        let connection = Connection::from_dsn(dsn, &Value::Null, Arc::new(factory)).unwrap();
        AmqpSender::new(Arc::new(connection), Arc::new(JsonSerializer::new()))
    }

    fn received(routing_key: &str) -> BrokerMessage {
        BrokerMessage {
            body: b"{}".to_vec(),
            delivery_tag: 1,
            exchange: "messages".to_owned(),
            routing_key: routing_key.to_owned(),
            redelivered: false,
            attributes: MessageAttributes {
                correlation_id: Some("corr-1".to_owned()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn should_publish_the_encoded_envelope_on_the_main_exchange() {
        let mut channel = MockAmqpChannel::new();
        channel.expect_is_connected().returning(|| true);
        channel
            .expect_publish()
            .withf(|exchange, routing_key, body, flags, attributes| {
                exchange == "messages"
                    && routing_key == "order.created"
                    && body == b"{\"id\":1}"
                    && *flags == Flags::NONE
                    && attributes.headers["type"] == "App\\OrderPlaced"
                    && attributes.content_type.as_deref() == Some("application/json")
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let envelope = Envelope::new(Message::new("App\\OrderPlaced", "{\"id\":1}")).with(
            AmqpStamp::new(Some("order.created"), Flags::NONE, MessageAttributes::default()),
        );

        let sent = sender("amqp://localhost?auto_setup=false", channel)
            .send(envelope.clone())
            .await
            .unwrap();

        assert_eq!(sent, envelope);
    }

    #[tokio::test]
    async fn should_route_a_redelivery_to_the_originating_queue_through_a_retry_queue() {
        let mut channel = MockAmqpChannel::new();
        channel.expect_is_connected().returning(|| true);
        channel
            .expect_declare_queue()
            .withf(|def| def.name == "delay_messages_orders_1000_retry")
            .times(1)
            .returning(|_| Ok(0));
        channel.expect_bind_queue().times(1).returning(|_| Ok(()));
        channel
            .expect_publish()
            .withf(|exchange, routing_key, _, _, attributes| {
                exchange == "delays"
                    && routing_key == "delay_messages_orders_1000_retry"
                    && attributes.correlation_id.as_deref() == Some("corr-1")
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let envelope = Envelope::new(Message::new("App\\OrderPlaced", "{}"))
            .with(AmqpReceivedStamp::new(received("order.created"), "orders"))
            .with(RedeliveryStamp::new(1))
            .with(DelayStamp::new(1000));

        sender("amqp://localhost?auto_setup=false", channel)
            .send(envelope)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn should_keep_the_received_routing_key_without_redelivery() {
        let mut channel = MockAmqpChannel::new();
        channel.expect_is_connected().returning(|| true);
        channel
            .expect_publish()
            .withf(|exchange, routing_key, _, _, _| {
                exchange == "messages" && routing_key == "order.created"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let envelope = Envelope::new(Message::new("App\\OrderPlaced", "{}"))
            .with(AmqpReceivedStamp::new(received("order.created"), "orders"));

        sender("amqp://localhost?auto_setup=false", channel)
            .send(envelope)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn should_propagate_publish_failures() {
        let mut channel = MockAmqpChannel::new();
        channel.expect_is_connected().returning(|| true);
        channel
            .expect_publish()
            .returning(|exchange, _, _, _, _| Err(AmqpError::PublishingError(exchange.to_owned())));

        let err = sender("amqp://localhost?auto_setup=false", channel)
            .send(Envelope::new(Message::new("App\\Ping", "")))
            .await
            .unwrap_err();

        assert_eq!(err, AmqpError::PublishingError("messages".to_owned()));
    }
}
