// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Queue declarations and queue-to-exchange bindings, shared by the
//! configured queues and the transient delay queues.

use crate::{arguments::Arguments, flags::Flags};

/// Definition of a queue with its declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub name: String,
    pub flags: Flags,
    pub arguments: Arguments,
}

impl QueueDefinition {
    /// Creates a new durable queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            flags: Flags::DURABLE,
            arguments: Arguments::default(),
        }
    }

    /// Replaces the declaration flags.
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the queue arguments (`x-message-ttl`, `x-dead-letter-exchange`, ...).
    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }
}

impl From<&QueueDefinition> for lapin::options::QueueDeclareOptions {
    fn from(def: &QueueDefinition) -> Self {
        lapin::options::QueueDeclareOptions {
            passive: def.flags.passive(),
            durable: def.flags.durable(),
            exclusive: def.flags.exclusive(),
            auto_delete: def.flags.auto_delete(),
            nowait: def.flags.no_wait(),
        }
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Headers exchanges match on `arguments` and ignore the routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue_name: String,
    pub exchange_name: String,
    pub routing_key: String,
    pub arguments: Arguments,
}

impl QueueBinding {
    /// Creates a new binding for the given queue with an empty routing key.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
            arguments: Arguments::default(),
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    /// Sets the binding arguments.
    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }
}
