// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Topology Management
//!
//! This module provides functionality for defining and installing the broker
//! topology the transport relies on: the main exchange, the configured queues
//! and their bindings, and the direct exchange carrying delayed messages.
//!
//! The main components are:
//! - `Topology` trait: Interface for topology management
//! - `AmqpTopology`: An ordered set of declarations installed through an [`AmqpChannel`]

use crate::{
    channel::AmqpChannel,
    config::TransportConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use tracing::debug;

/// Trait defining the interface for topology management.
///
/// This trait provides methods for registering exchanges, queues, and bindings,
/// as well as installing the topology on the broker.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Installs the topology on the broker.
    ///
    /// This creates all the exchanges and queues, and sets up all the bindings.
    async fn install(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError>;
}

/// Declarations installed in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmqpTopology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    /// Creates an empty topology.
    pub fn new() -> AmqpTopology {
        AmqpTopology::default()
    }

    /// The main exchange with every configured queue bound to it.
    ///
    /// A queue without binding keys is bound once with an empty key; each
    /// binding carries the queue's binding arguments. The default exchange
    /// (empty name) cannot be declared or bound to and is left alone.
    pub fn from_config(config: &TransportConfig) -> AmqpTopology {
        let exchange = &config.exchange;
        let mut topology = AmqpTopology::new();

        if !exchange.name.is_empty() {
            topology = topology.exchange(
                ExchangeDefinition::new(&exchange.name)
                    .kind(exchange.kind.clone())
                    .flags(exchange.flags)
                    .params(exchange.arguments.clone()),
            );
        }

        for queue in &config.queues {
            topology = topology.queue(
                QueueDefinition::new(&queue.name)
                    .flags(queue.flags)
                    .arguments(queue.arguments.clone()),
            );

            if exchange.name.is_empty() {
                continue;
            }

            let keys = if queue.binding_keys.is_empty() {
                vec![String::new()]
            } else {
                queue.binding_keys.clone()
            };

            for key in keys {
                topology = topology.queue_binding(
                    QueueBinding::new(&queue.name)
                        .exchange(&exchange.name)
                        .routing_key(&key)
                        .arguments(queue.binding_arguments.clone()),
                );
            }
        }

        topology
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    /// Adds an exchange definition to the topology.
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Declares exchanges, then queues, then bindings.
    async fn install(&self, channel: &dyn AmqpChannel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            channel.declare_exchange(exch).await?;
        }

        for queue in &self.queues {
            channel.declare_queue(queue).await?;
        }

        for binding in &self.queues_binding {
            channel.bind_queue(binding).await?;
        }

        debug!(
            exchanges = self.exchanges.len(),
            queues = self.queues.len(),
            bindings = self.queues_binding.len(),
            "topology installed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arguments::ArgumentValue, channel::MockAmqpChannel, exchange::ExchangeKind, flags::Flags,
    };
    use mockall::{predicate::eq, Sequence};
    use serde_json::Value;

    fn config(dsn: &str) -> TransportConfig {
        TransportConfig::from_dsn(dsn, &Value::Null).unwrap()
    }

    #[test]
    fn should_bind_once_per_binding_key() {
        let topology = AmqpTopology::from_config(&config(
            "amqp://localhost/%2f/events?exchange[type]=topic&queues[orders][binding_keys][]=order.created&queues[orders][binding_keys][]=order.paid&queues[audit]",
        ));

        assert_eq!(topology.exchanges.len(), 1);
        assert_eq!(topology.exchanges[0].kind, ExchangeKind::Topic);
        assert_eq!(
            topology.queues.iter().map(|q| q.name.as_str()).collect::<Vec<_>>(),
            vec!["orders", "audit"]
        );

        let bindings: Vec<_> = topology
            .queues_binding
            .iter()
            .map(|b| (b.queue_name.as_str(), b.routing_key.as_str()))
            .collect();
        assert_eq!(
            bindings,
            vec![
                ("orders", "order.created"),
                ("orders", "order.paid"),
                ("audit", "")
            ]
        );
    }

    #[test]
    fn should_carry_binding_arguments_for_headers_exchanges() {
        let topology = AmqpTopology::from_config(&config(
            "amqp://localhost/%2f/events?exchange[type]=headers&queues[q][binding_arguments][x-match]=any&queues[q][flags]=18",
        ));

        let binding = &topology.queues_binding[0];
        assert_eq!(binding.routing_key, "");
        assert_eq!(binding.arguments["x-match"], ArgumentValue::from("any"));
        assert_eq!(topology.queues[0].flags, Flags::DURABLE | Flags::AUTODELETE);
    }

    #[test]
    fn should_not_declare_the_default_exchange() {
        let topology = AmqpTopology::from_config(&config(
            "amqp://localhost/%2f/messages?exchange[name]=&queues[direct]",
        ));

        assert!(topology.exchanges.is_empty());
        assert!(topology.queues_binding.is_empty());
        assert_eq!(topology.queues.len(), 1);
    }

    #[tokio::test]
    async fn should_install_exchanges_then_queues_then_bindings() {
        let topology = AmqpTopology::from_config(&config("amqp://localhost/%2f/messages"));
        let mut channel = MockAmqpChannel::new();
        let mut seq = Sequence::new();

        channel
            .expect_declare_exchange()
            .with(eq(ExchangeDefinition::new("messages")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        channel
            .expect_declare_queue()
            .with(eq(QueueDefinition::new("messages")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(0));
        channel
            .expect_bind_queue()
            .with(eq(QueueBinding::new("messages").exchange("messages")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        topology.install(&channel).await.unwrap();
    }

    #[tokio::test]
    async fn should_stop_at_the_first_failing_declaration() {
        let topology = AmqpTopology::from_config(&config("amqp://localhost/%2f/messages"));
        let mut channel = MockAmqpChannel::new();

        channel
            .expect_declare_exchange()
            .returning(|def| Err(AmqpError::DeclareExchangeError(def.name.clone())));
        channel.expect_declare_queue().never();
        channel.expect_bind_queue().never();

        let err = topology.install(&channel).await.unwrap_err();
        assert_eq!(err, AmqpError::DeclareExchangeError("messages".to_owned()));
    }
}
