// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Envelope Serialization
//!
//! Converts envelopes to and from the body and string headers that travel
//! through the broker. Only stamps that mean something to the next consumer
//! are sent; transport-local stamps stay behind.

use crate::{
    envelope::{Envelope, Message},
    errors::AmqpError,
    message::Headers,
    stamps::{DelayStamp, RedeliveryStamp, Stamp},
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::error;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header naming the message type.
pub const TYPE_HEADER: &str = "type";

const DELAY_STAMP_HEADER: &str = "X-Message-Stamp-DelayStamp";
const REDELIVERY_STAMP_HEADER: &str = "X-Message-Stamp-RedeliveryStamp";

/// A message in its wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedMessage {
    pub body: Vec<u8>,
    pub headers: Headers,
}

pub trait Serializer: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<EncodedMessage, AmqpError>;

    fn decode(&self, encoded: EncodedMessage) -> Result<Envelope, AmqpError>;
}

/// Keeps the message body as is and sends the stamps as JSON headers.
#[derive(Debug, Clone)]
pub struct JsonSerializer {
    content_type: Option<String>,
}

impl Default for JsonSerializer {
    fn default() -> Self {
        JsonSerializer {
            content_type: Some(JSON_CONTENT_TYPE.to_owned()),
        }
    }
}

impl JsonSerializer {
    pub fn new() -> JsonSerializer {
        JsonSerializer::default()
    }

    /// Content type announced in the `Content-Type` header, none to omit it.
    pub fn content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type.map(str::to_owned);
        self
    }
}

impl Serializer for JsonSerializer {
    fn encode(&self, envelope: &Envelope) -> Result<EncodedMessage, AmqpError> {
        let mut headers = Headers::new();
        headers.insert(TYPE_HEADER.to_owned(), envelope.message().kind.clone());

        if let Some(content_type) = &self.content_type {
            headers.insert("Content-Type".to_owned(), content_type.clone());
        }

        let delays = envelope.all::<DelayStamp>();
        if !delays.is_empty() {
            headers.insert(DELAY_STAMP_HEADER.to_owned(), to_json(&delays)?);
        }

        let redeliveries = envelope.all::<RedeliveryStamp>();
        if !redeliveries.is_empty() {
            headers.insert(REDELIVERY_STAMP_HEADER.to_owned(), to_json(&redeliveries)?);
        }

        Ok(EncodedMessage {
            body: envelope.message().body.clone(),
            headers,
        })
    }

    fn decode(&self, encoded: EncodedMessage) -> Result<Envelope, AmqpError> {
        let Some(kind) = encoded.headers.get(TYPE_HEADER) else {
            error!("encoded envelope has no message type");
            return Err(AmqpError::DecodeError(
                "Encoded envelope does not have a \"type\" header.".to_owned(),
            ));
        };

        let mut stamps = Vec::new();
        if let Some(raw) = encoded.headers.get(DELAY_STAMP_HEADER) {
            stamps.extend(from_json::<DelayStamp>(raw)?.into_iter().map(Stamp::from));
        }
        if let Some(raw) = encoded.headers.get(REDELIVERY_STAMP_HEADER) {
            stamps.extend(
                from_json::<RedeliveryStamp>(raw)?
                    .into_iter()
                    .map(Stamp::from),
            );
        }

        Ok(Envelope::new(Message::new(kind, encoded.body)).with_all(stamps))
    }
}

fn to_json<T: Serialize>(stamps: &[&T]) -> Result<String, AmqpError> {
    serde_json::to_string(stamps).map_err(|err| {
        error!(error = err.to_string(), "failure to encode stamps");
        AmqpError::EncodeError(err.to_string())
    })
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, AmqpError> {
    serde_json::from_str(raw).map_err(|err| {
        error!(error = err.to_string(), "failure to decode stamps");
        AmqpError::DecodeError(err.to_string())
    })
}
