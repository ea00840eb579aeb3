// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Messages
//!
//! The attribute map sent with every publish and the message handed back by
//! a `get` on a queue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String headers carried by every message.
pub type Headers = BTreeMap<String, String>;

/// Delivery mode of a message the broker keeps only in memory.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// Delivery mode of a message the broker persists to disk.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Broker attributes (AMQP basic properties) of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttributes {
    #[serde(default)]
    pub headers: Headers,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub timestamp: Option<u64>,
    pub app_id: Option<String>,
    pub message_id: Option<String>,
    pub user_id: Option<String>,
    pub expiration: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
}

impl MessageAttributes {
    /// Fills every attribute left unset here with the one from `fallback`.
    ///
    /// Headers are only taken from `fallback` when none are set here.
    pub fn or(mut self, fallback: &MessageAttributes) -> MessageAttributes {
        if self.headers.is_empty() {
            self.headers = fallback.headers.clone();
        }
        self.content_type = self.content_type.or_else(|| fallback.content_type.clone());
        self.content_encoding = self
            .content_encoding
            .or_else(|| fallback.content_encoding.clone());
        self.delivery_mode = self.delivery_mode.or(fallback.delivery_mode);
        self.priority = self.priority.or(fallback.priority);
        self.timestamp = self.timestamp.or(fallback.timestamp);
        self.app_id = self.app_id.or_else(|| fallback.app_id.clone());
        self.message_id = self.message_id.or_else(|| fallback.message_id.clone());
        self.user_id = self.user_id.or_else(|| fallback.user_id.clone());
        self.expiration = self.expiration.or_else(|| fallback.expiration.clone());
        self.kind = self.kind.or_else(|| fallback.kind.clone());
        self.reply_to = self.reply_to.or_else(|| fallback.reply_to.clone());
        self.correlation_id = self
            .correlation_id
            .or_else(|| fallback.correlation_id.clone());
        self
    }
}

/// A message fetched from a queue, still awaiting ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub attributes: MessageAttributes,
}

impl BrokerMessage {
    pub fn headers(&self) -> &Headers {
        &self.attributes.headers
    }
}
