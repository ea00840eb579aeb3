// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! An in-memory broker behind the client seam.
//!
//! Routes through direct, fanout and topic exchanges and the default
//! exchange, and dead-letters messages whose `x-message-ttl` ran out on a
//! manual clock moved with [`InMemoryBroker::advance`].

#![allow(dead_code)]

use amqp_transport::{
    arguments::{
        Arguments, AMQP_ARGS_DEAD_LETTER_EXCHANGE, AMQP_ARGS_DEAD_LETTER_ROUTING_KEY,
        AMQP_ARGS_MESSAGE_TTL,
    },
    channel::{AmqpChannel, AmqpConnection, AmqpFactory},
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    flags::Flags,
    message::{BrokerMessage, MessageAttributes},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

#[derive(Debug, Clone)]
struct Stored {
    body: Vec<u8>,
    exchange: String,
    routing_key: String,
    attributes: MessageAttributes,
    enqueued_at_ms: u64,
}

#[derive(Debug, Default)]
struct MemQueue {
    arguments: Arguments,
    ready: VecDeque<Stored>,
    unacked: HashMap<u64, Stored>,
}

#[derive(Debug, Default)]
struct BrokerState {
    now_ms: u64,
    next_tag: u64,
    connected: bool,
    refuse_connections: bool,
    connections_opened: usize,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, MemQueue>,
    bindings: Vec<QueueBinding>,
    declarations: Vec<String>,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, stored: Stored) -> Result<(), AmqpError> {
        let targets: Vec<String> = if exchange.is_empty() {
            self.queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect()
        } else {
            let Some(kind) = self.exchanges.get(exchange) else {
                return Err(AmqpError::PublishingError(exchange.to_owned()));
            };

            let mut targets: Vec<String> = Vec::new();
            for binding in self.bindings.iter().filter(|b| b.exchange_name == exchange) {
                let matches = match kind {
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
                    _ => binding.routing_key == routing_key,
                };
                if matches && !targets.contains(&binding.queue_name) {
                    targets.push(binding.queue_name.clone());
                }
            }
            targets
        };

        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(Stored {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    ..stored.clone()
                });
            }
        }

        Ok(())
    }

    /// Dead-letters every message whose TTL has run out, until nothing moves.
    fn expire(&mut self) {
        let now = self.now_ms;
        loop {
            let mut expired = Vec::new();

            for queue in self.queues.values_mut() {
                let Some(ttl) = queue
                    .arguments
                    .get(AMQP_ARGS_MESSAGE_TTL)
                    .and_then(|ttl| ttl.as_i64())
                else {
                    continue;
                };

                while queue
                    .ready
                    .front()
                    .is_some_and(|msg| msg.enqueued_at_ms + ttl as u64 <= now)
                {
                    let Some(msg) = queue.ready.pop_front() else {
                        break;
                    };
                    let dlx = queue
                        .arguments
                        .get(AMQP_ARGS_DEAD_LETTER_EXCHANGE)
                        .and_then(|v| v.as_str())
                        .map(str::to_owned);
                    let dlrk = queue
                        .arguments
                        .get(AMQP_ARGS_DEAD_LETTER_ROUTING_KEY)
                        .and_then(|v| v.as_str())
                        .map(str::to_owned)
                        .unwrap_or_else(|| msg.routing_key.clone());
                    if let Some(dlx) = dlx {
                        expired.push((dlx, dlrk, msg));
                    }
                }
            }

            if expired.is_empty() {
                return;
            }

            for (exchange, routing_key, mut msg) in expired {
                msg.enqueued_at_ms = now;
                let _ = self.route(&exchange, &routing_key, msg);
            }
        }
    }
}

fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], words: &[&str]) -> bool {
        match (pattern.first(), words.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], words) || (!words.is_empty() && matches(pattern, &words[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &words[1..]),
            (Some(p), Some(w)) if p == w => matches(&pattern[1..], &words[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &words)
}

/// A broker shared by every connection created from its factory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> InMemoryBroker {
        InMemoryBroker::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn factory(&self) -> Arc<dyn AmqpFactory> {
        Arc::new(self.clone())
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state();
        state.now_ms += by.as_millis() as u64;
        state.expire();
    }

    /// Simulates the broker closing the open channels.
    pub fn drop_connections(&self) {
        self.state().connected = false;
    }

    pub fn refuse_connections(&self) {
        self.state().refuse_connections = true;
    }

    pub fn connections_opened(&self) -> usize {
        self.state().connections_opened
    }

    pub fn ready(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.state().queues.contains_key(queue)
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.state().exchanges.contains_key(exchange)
    }

    pub fn queue_arguments(&self, queue: &str) -> Option<Arguments> {
        self.state().queues.get(queue).map(|q| q.arguments.clone())
    }

    /// Every declare and bind call received, in order.
    pub fn declarations(&self) -> Vec<String> {
        self.state().declarations.clone()
    }
}

impl AmqpFactory for InMemoryBroker {
    fn create_connection(&self, _config: &ConnectionConfig) -> Box<dyn AmqpConnection> {
        Box::new(MemConnection {
            broker: self.clone(),
        })
    }
}

struct MemConnection {
    broker: InMemoryBroker,
}

#[async_trait]
impl AmqpConnection for MemConnection {
    async fn connect(&mut self) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        if state.refuse_connections {
            return Err(AmqpError::ConnectionError);
        }
        state.connected = true;
        state.connections_opened += 1;
        Ok(())
    }

    async fn pconnect(&mut self) -> Result<(), AmqpError> {
        self.connect().await
    }

    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>, AmqpError> {
        Ok(Box::new(MemChannel {
            broker: self.broker.clone(),
        }))
    }
}

struct MemChannel {
    broker: InMemoryBroker,
}

#[async_trait]
impl AmqpChannel for MemChannel {
    fn is_connected(&self) -> bool {
        self.broker.state().connected
    }

    async fn confirm_select(&self) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn wait_for_confirm(&self, _timeout: Duration) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        state.declarations.push(format!("exchange:{}", def.name));
        state.exchanges.insert(def.name.clone(), def.kind.clone());
        Ok(())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<u32, AmqpError> {
        let mut state = self.broker.state();
        state.declarations.push(format!("queue:{}", def.name));
        state.expire();

        let queue = state.queues.entry(def.name.clone()).or_insert_with(|| MemQueue {
            arguments: def.arguments.clone(),
            ..Default::default()
        });
        Ok(queue.ready.len() as u32)
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        state.declarations.push(format!(
            "bind:{}->{}:{}",
            binding.exchange_name, binding.queue_name, binding.routing_key
        ));

        if !state.exchanges.contains_key(&binding.exchange_name) {
            return Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ));
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        _flags: Flags,
        attributes: &MessageAttributes,
    ) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        let stored = Stored {
            body: body.to_vec(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            attributes: attributes.clone(),
            enqueued_at_ms: state.now_ms,
        };
        state.route(exchange, routing_key, stored)
    }

    async fn get(&self, queue: &str) -> Result<Option<BrokerMessage>, AmqpError> {
        let mut state = self.broker.state();
        state.expire();

        state.next_tag += 1;
        let tag = state.next_tag;

        let Some(mem) = state.queues.get_mut(queue) else {
            return Err(AmqpError::GetMessageError(queue.to_owned()));
        };
        let Some(stored) = mem.ready.pop_front() else {
            return Ok(None);
        };
        mem.unacked.insert(tag, stored.clone());

        Ok(Some(BrokerMessage {
            body: stored.body,
            delivery_tag: tag,
            exchange: stored.exchange,
            routing_key: stored.routing_key,
            redelivered: false,
            attributes: stored.attributes,
        }))
    }

    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        state
            .queues
            .get_mut(queue)
            .and_then(|mem| mem.unacked.remove(&delivery_tag))
            .map(|_| ())
            .ok_or(AmqpError::AckMessageError)
    }

    async fn nack(&self, queue: &str, delivery_tag: u64, flags: Flags) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        let mem = state.queues.get_mut(queue).ok_or(AmqpError::NackMessageError)?;
        let stored = mem
            .unacked
            .remove(&delivery_tag)
            .ok_or(AmqpError::NackMessageError)?;

        if flags.requeue() {
            mem.ready.push_front(stored);
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        if let Some(mem) = state.queues.get_mut(queue) {
            mem.ready.clear();
        }
        Ok(())
    }
}
