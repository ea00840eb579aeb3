// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Receiver
//!
//! Polls the configured queues in declaration order and turns broker messages
//! back into envelopes. Every envelope it yields carries an
//! [`AmqpReceivedStamp`], which is what [`AmqpReceiver::ack`] and
//! [`AmqpReceiver::reject`] act upon.

use crate::{
    connection::Connection,
    envelope::Envelope,
    errors::AmqpError,
    flags::Flags,
    message::BrokerMessage,
    otel,
    serializer::{EncodedMessage, Serializer},
    stamps::AmqpReceivedStamp,
};
use futures_util::{
    stream::{self, BoxStream},
    StreamExt,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error};

pub struct AmqpReceiver {
    connection: Arc<Connection>,
    serializer: Arc<dyn Serializer>,
    tracer: BoxedTracer,
}

impl AmqpReceiver {
    pub fn new(connection: Arc<Connection>, serializer: Arc<dyn Serializer>) -> AmqpReceiver {
        AmqpReceiver {
            connection,
            serializer,
            tracer: global::tracer("amqp-transport"),
        }
    }

    /// One pass over every configured queue.
    ///
    /// The stream ends after the first envelope, or once every queue was
    /// found empty. Call again to keep polling.
    pub fn poll(&self) -> BoxStream<'_, Result<Envelope, AmqpError>> {
        self.poll_queues(self.connection.get_queue_names())
    }

    /// One pass over the given queues, in the given order.
    pub fn poll_queues(&self, queue_names: Vec<String>) -> BoxStream<'_, Result<Envelope, AmqpError>> {
        stream::unfold(Some(queue_names.into_iter()), move |queues| async move {
            let mut queues = queues?;

            for queue_name in queues.by_ref() {
                match self.get_envelope(&queue_name).await {
                    Ok(None) => continue,
                    Ok(Some(envelope)) => return Some((Ok(envelope), None)),
                    Err(err) => return Some((Err(err), None)),
                }
            }

            None
        })
        .boxed()
    }

    pub async fn ack(&self, envelope: &Envelope) -> Result<(), AmqpError> {
        let stamp = received_stamp(envelope)?;

        self.connection
            .ack(stamp.message(), stamp.queue_name())
            .await
    }

    /// Rejects the delivery without requeueing it.
    pub async fn reject(&self, envelope: &Envelope) -> Result<(), AmqpError> {
        let stamp = received_stamp(envelope)?;

        self.reject_message(stamp.message(), stamp.queue_name())
            .await
    }

    /// Approximate number of messages waiting in the configured queues.
    pub async fn message_count(&self) -> Result<u64, AmqpError> {
        self.connection.count_messages_in_queues().await
    }

    async fn get_envelope(&self, queue_name: &str) -> Result<Option<Envelope>, AmqpError> {
        let Some(message) = self.connection.get(queue_name).await? else {
            return Ok(None);
        };

        let kind = message
            .attributes
            .headers
            .get("type")
            .cloned()
            .unwrap_or_else(|| queue_name.to_owned());
        let (_ctx, mut span) = otel::new_span(message.headers(), &self.tracer, &kind);

        debug!(
            queue = queue_name,
            delivery_tag = message.delivery_tag,
            "received message"
        );

        let decoded = self.serializer.decode(EncodedMessage {
            body: message.body.clone(),
            headers: message.headers().clone(),
        });

        match decoded {
            Ok(envelope) => {
                span.set_status(Status::Ok);
                span.end();
                Ok(Some(envelope.with(AmqpReceivedStamp::new(message, queue_name))))
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = queue_name,
                    "could not decode message, rejecting it"
                );
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("failure to decode message"),
                });
                span.end();

                if let Err(reject_err) = self.reject_message(&message, queue_name).await {
                    error!(
                        error = reject_err.to_string(),
                        queue = queue_name,
                        "failure to reject undecodable message"
                    );
                }
                Err(err)
            }
        }
    }

    async fn reject_message(&self, message: &BrokerMessage, queue_name: &str) -> Result<(), AmqpError> {
        self.connection.nack(message, queue_name, Flags::NONE).await
    }
}

fn received_stamp(envelope: &Envelope) -> Result<&AmqpReceivedStamp, AmqpError> {
    envelope.last::<AmqpReceivedStamp>().ok_or_else(|| {
        error!("envelope was not received from AMQP");
        AmqpError::MissingReceivedStampError
    })
}
