// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delay and Retry Queues
//!
//! Delayed delivery works without any broker plugin: the message is published
//! to a direct "delays" exchange and lands in a transient queue whose
//! `x-message-ttl` equals the delay. When the TTL expires the broker
//! dead-letters the message back:
//!
//! - a plain delay goes back to the main exchange with its original routing
//!   key, so every queue bound to that key sees it again;
//! - a retry goes to the retry dead-letter exchange (the default exchange
//!   unless configured) so it reaches only the queue it was received from.
//!
//! Each delay queue expires on its own 10 seconds after its TTL once idle.

use crate::{
    arguments::{
        ArgumentValue, Arguments, AMQP_ARGS_DEAD_LETTER_EXCHANGE,
        AMQP_ARGS_DEAD_LETTER_ROUTING_KEY, AMQP_ARGS_EXPIRES, AMQP_ARGS_MESSAGE_TTL,
    },
    config::{DelayConfig, RetryConfig},
    exchange::ExchangeDefinition,
    flags::Flags,
    queue::{QueueBinding, QueueDefinition},
};
use std::time::Duration;

/// Extra lifetime of an idle delay queue past its message TTL, in milliseconds.
pub const DELAY_QUEUE_EXPIRY_GRACE_MS: u64 = 10_000;

/// Identifies one delay queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DelayQueueKey {
    pub routing_key: Option<String>,
    pub delay_ms: u64,
    pub is_retry: bool,
}

/// A resolved delay queue: its name doubles as the routing key on the delay exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayQueue {
    pub name: String,
    pub arguments: Arguments,
}

impl DelayQueue {
    pub fn definition(&self) -> QueueDefinition {
        QueueDefinition::new(&self.name)
            .flags(Flags::DURABLE)
            .arguments(self.arguments.clone())
    }

    pub fn binding(&self, delay_exchange: &str) -> QueueBinding {
        QueueBinding::new(&self.name)
            .exchange(delay_exchange)
            .routing_key(&self.name)
    }
}

/// Computes delay queue names and dead-letter arguments for one main exchange.
#[derive(Debug, Clone)]
pub struct DelayEncoder<'a> {
    exchange_name: &'a str,
    delay: &'a DelayConfig,
    retry: &'a RetryConfig,
}

impl<'a> DelayEncoder<'a> {
    pub fn new(exchange_name: &'a str, delay: &'a DelayConfig, retry: &'a RetryConfig) -> Self {
        DelayEncoder {
            exchange_name,
            delay,
            retry,
        }
    }

    /// The direct exchange all delay queues are bound to.
    pub fn exchange(&self) -> ExchangeDefinition {
        ExchangeDefinition::new(&self.delay.exchange_name)
            .direct()
            .flags(Flags::DURABLE)
    }

    /// Name of the delay queue, which is also its routing key on the delay exchange.
    pub fn queue_name(&self, key: &DelayQueueKey) -> String {
        let action = if key.is_retry { "_retry" } else { "_delay" };

        let mut name = self
            .delay
            .queue_name_pattern
            .replace("%delay%", &key.delay_ms.to_string())
            .replace("%exchange_name%", self.exchange_name)
            .replace("%routing_key%", key.routing_key.as_deref().unwrap_or_default());
        name.push_str(action);
        name
    }

    pub fn resolve(&self, key: &DelayQueueKey) -> DelayQueue {
        let routing_key = key.routing_key.clone().unwrap_or_default();
        let (dead_letter_exchange, dead_letter_routing_key) = if key.is_retry {
            (
                self.retry.dead_letter_exchange.clone(),
                self.retry.dead_routing_key.clone().unwrap_or(routing_key),
            )
        } else {
            (self.exchange_name.to_owned(), routing_key)
        };

        let delay_ms = i64::try_from(key.delay_ms).unwrap_or(i64::MAX);
        let mut arguments = Arguments::new();
        arguments.insert(AMQP_ARGS_MESSAGE_TTL.to_owned(), ArgumentValue::Int(delay_ms));
        arguments.insert(
            AMQP_ARGS_EXPIRES.to_owned(),
            ArgumentValue::Int(delay_ms.saturating_add(DELAY_QUEUE_EXPIRY_GRACE_MS as i64)),
        );
        arguments.insert(
            AMQP_ARGS_DEAD_LETTER_EXCHANGE.to_owned(),
            ArgumentValue::String(dead_letter_exchange),
        );
        arguments.insert(
            AMQP_ARGS_DEAD_LETTER_ROUTING_KEY.to_owned(),
            ArgumentValue::String(dead_letter_routing_key),
        );

        DelayQueue {
            name: self.queue_name(key),
            arguments,
        }
    }
}

/// How long a declared delay queue is trusted to still exist.
pub fn delay_queue_lease() -> Duration {
    Duration::from_millis(DELAY_QUEUE_EXPIRY_GRACE_MS / 2)
}
