// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Connection
//!
//! [`Connection`] owns the broker connection and its single channel. It
//! connects lazily, reconnects when the channel reports itself closed,
//! installs the configured topology once, and declares delay queues on
//! demand. Sender and receiver share it through an `Arc` and never see the
//! channel themselves.
//!
//! All calls go through one async mutex, so a connection serializes its own
//! broker traffic.

use crate::{
    channel::{AmqpChannel, AmqpConnection, AmqpFactory},
    config::TransportConfig,
    delay::{delay_queue_lease, DelayEncoder, DelayQueueKey},
    errors::AmqpError,
    flags::Flags,
    message::{BrokerMessage, Headers, MessageAttributes, DELIVERY_MODE_PERSISTENT},
    queue::QueueDefinition,
    stamps::AmqpStamp,
    topology::{AmqpTopology, Topology},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, error, warn};

/// Header moved into the `content_type` attribute on publish.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Where a connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No channel has been opened yet.
    Unconnected,
    /// A channel is open, the topology is not installed.
    Connected,
    /// A channel is open and the topology is installed.
    SetupDone,
}

struct Session {
    _connection: Box<dyn AmqpConnection>,
    channel: Box<dyn AmqpChannel>,
}

#[derive(Default)]
struct ConnectionState {
    session: Option<Session>,
    topology_installed: bool,
    delay_exchange_declared: bool,
    /// Last declaration time of every delay queue used on the current channel.
    delay_queues: HashMap<DelayQueueKey, Instant>,
}

impl ConnectionState {
    fn channel(&self) -> Result<&dyn AmqpChannel, AmqpError> {
        match &self.session {
            Some(session) => Ok(session.channel.as_ref()),
            None => Err(AmqpError::ChannelError),
        }
    }
}

/// The transport's handle on the broker.
pub struct Connection {
    config: TransportConfig,
    factory: Arc<dyn AmqpFactory>,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(config: TransportConfig, factory: Arc<dyn AmqpFactory>) -> Connection {
        Connection {
            config,
            factory,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Parses `dsn` and `options` into a connection; nothing is opened yet.
    pub fn from_dsn(
        dsn: &str,
        options: &Value,
        factory: Arc<dyn AmqpFactory>,
    ) -> Result<Connection, AmqpError> {
        Ok(Connection::new(TransportConfig::from_dsn(dsn, options)?, factory))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Names of the configured queues, in declaration order.
    pub fn get_queue_names(&self) -> Vec<String> {
        self.config
            .queue_names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        let state = self.state.lock().await;
        match (&state.session, state.topology_installed) {
            (None, _) => Lifecycle::Unconnected,
            (Some(_), false) => Lifecycle::Connected,
            (Some(_), true) => Lifecycle::SetupDone,
        }
    }

    /// Opens the connection and channel unless a usable channel is already open.
    pub async fn connect(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;
        self.ensure_channel(&mut state).await
    }

    /// Publishes a message on the main exchange, or through a delay queue
    /// when `delay_ms` is not zero.
    pub async fn publish(
        &self,
        body: &[u8],
        headers: &Headers,
        delay_ms: u64,
        stamp: Option<&AmqpStamp>,
    ) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;
        self.ensure_channel(&mut state).await?;

        // the main exchange must exist for delay queues to dead-letter into it
        if self.config.connection.auto_setup && !state.topology_installed {
            self.install_topology(&mut state).await?;
        }

        let routing_key = stamp
            .and_then(AmqpStamp::routing_key)
            .or(self.config.exchange.default_publish_routing_key.as_deref());
        let flags = stamp.map_or(Flags::NONE, AmqpStamp::flags);
        let attributes = publish_attributes(headers, stamp);

        let (exchange, routing_key) = if delay_ms > 0 {
            let key = DelayQueueKey {
                routing_key: routing_key.map(str::to_owned),
                delay_ms,
                is_retry: stamp.is_some_and(AmqpStamp::is_retry_attempt),
            };
            let queue_name = self.setup_delay(&mut state, &key).await?;
            (self.config.delay.exchange_name.as_str(), queue_name)
        } else {
            (
                self.config.exchange.name.as_str(),
                routing_key.unwrap_or_default().to_owned(),
            )
        };

        debug!(
            exchange = exchange,
            routing_key = routing_key,
            delay_ms = delay_ms,
            "publishing message"
        );

        let channel = state.channel()?;
        channel
            .publish(exchange, &routing_key, body, flags, &attributes)
            .await?;

        if let Some(timeout) = self.config.connection.confirm_timeout {
            channel.wait_for_confirm(timeout).await?;
        }

        Ok(())
    }

    /// Fetches one message from a configured queue, `None` when it is empty.
    pub async fn get(&self, queue_name: &str) -> Result<Option<BrokerMessage>, AmqpError> {
        self.queue_definition(queue_name)?;

        let mut state = self.state.lock().await;
        self.ensure_channel(&mut state).await?;

        if self.config.connection.auto_setup && !state.topology_installed {
            self.install_topology(&mut state).await?;
        }

        state.channel()?.get(queue_name).await
    }

    pub async fn ack(&self, message: &BrokerMessage, queue_name: &str) -> Result<(), AmqpError> {
        let state = self.state.lock().await;
        let Ok(channel) = state.channel() else {
            error!(queue = queue_name, "cannot ack without an open channel");
            return Err(AmqpError::AckMessageError);
        };

        channel.ack(queue_name, message.delivery_tag).await
    }

    pub async fn nack(
        &self,
        message: &BrokerMessage,
        queue_name: &str,
        flags: Flags,
    ) -> Result<(), AmqpError> {
        let state = self.state.lock().await;
        let Ok(channel) = state.channel() else {
            error!(queue = queue_name, "cannot nack without an open channel");
            return Err(AmqpError::NackMessageError);
        };

        channel.nack(queue_name, message.delivery_tag, flags).await
    }

    /// Declares the exchange, the queues with their bindings and the delay
    /// exchange, whatever `auto_setup` says.
    pub async fn setup(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;
        self.ensure_channel(&mut state).await?;

        self.install_topology(&mut state).await?;
        self.declare_delay_exchange(&mut state).await
    }

    pub async fn purge_queues(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().await;
        self.ensure_channel(&mut state).await?;

        let channel = state.channel()?;
        for queue in &self.config.queues {
            channel.purge(&queue.name).await?;
        }

        Ok(())
    }

    /// Approximate number of messages waiting in all configured queues.
    pub async fn count_messages_in_queues(&self) -> Result<u64, AmqpError> {
        let mut state = self.state.lock().await;
        self.ensure_channel(&mut state).await?;

        let channel = state.channel()?;
        let mut count = 0u64;
        for queue in &self.config.queues {
            let def = self.queue_definition(&queue.name)?;
            count += u64::from(channel.declare_queue(&def).await?);
        }

        Ok(count)
    }

    fn queue_definition(&self, queue_name: &str) -> Result<QueueDefinition, AmqpError> {
        match self.config.queue(queue_name) {
            Some(queue) => Ok(QueueDefinition::new(&queue.name)
                .flags(queue.flags)
                .arguments(queue.arguments.clone())),
            None => {
                error!(queue = queue_name, "queue is not configured on this connection");
                Err(AmqpError::UnknownQueueError(queue_name.to_owned()))
            }
        }
    }

    async fn ensure_channel(&self, state: &mut ConnectionState) -> Result<(), AmqpError> {
        if let Some(session) = &state.session {
            if session.channel.is_connected() {
                return Ok(());
            }

            warn!(
                uri = self.config.connection.redacted_uri(),
                "amqp channel is disconnected, reconnecting"
            );
            state.session = None;
            state.delay_queues.clear();
        }

        let settings = &self.config.connection;
        let mut connection = self.factory.create_connection(settings);

        let opened = if settings.persistent {
            connection.pconnect().await
        } else {
            connection.connect().await
        };
        if let Err(err) = opened {
            error!(
                error = err.to_string(),
                uri = settings.redacted_uri(),
                "could not connect to the AMQP server"
            );
            return Err(AmqpError::ConnectionError);
        }

        let channel = connection.create_channel().await?;
        if settings.confirm_timeout.is_some() {
            channel.confirm_select().await?;
        }

        state.session = Some(Session {
            _connection: connection,
            channel,
        });

        Ok(())
    }

    async fn install_topology(&self, state: &mut ConnectionState) -> Result<(), AmqpError> {
        AmqpTopology::from_config(&self.config)
            .install(state.channel()?)
            .await?;
        state.topology_installed = true;

        Ok(())
    }

    fn delay_encoder(&self) -> DelayEncoder<'_> {
        DelayEncoder::new(
            &self.config.exchange.name,
            &self.config.delay,
            &self.config.retry,
        )
    }

    async fn declare_delay_exchange(&self, state: &mut ConnectionState) -> Result<(), AmqpError> {
        state
            .channel()?
            .declare_exchange(&self.delay_encoder().exchange())
            .await?;
        state.delay_exchange_declared = true;

        Ok(())
    }

    /// Makes sure the delay queue for `key` exists and returns its name.
    ///
    /// Delay queue names are dynamic, so they are declared even when
    /// `auto_setup` is off.
    async fn setup_delay(
        &self,
        state: &mut ConnectionState,
        key: &DelayQueueKey,
    ) -> Result<String, AmqpError> {
        if self.config.connection.auto_setup && !state.delay_exchange_declared {
            self.declare_delay_exchange(state).await?;
        }

        let encoder = self.delay_encoder();
        let queue = encoder.resolve(key);
        let now = Instant::now();
        state
            .delay_queues
            .retain(|_, declared_at| now.duration_since(*declared_at) < delay_queue_lease());

        let leased = state
            .delay_queues
            .get(key)
            .is_some_and(|declared_at| now.duration_since(*declared_at) < delay_queue_lease());
        if !leased {
            let channel = state.channel()?;
            channel.declare_queue(&queue.definition()).await?;
            channel
                .bind_queue(&queue.binding(&self.config.delay.exchange_name))
                .await?;
            state.delay_queues.insert(key.clone(), now);
        }

        Ok(queue.name)
    }
}

/// Broker attributes for one publish.
///
/// Stamp attributes win. Headers passed in override stamp headers. A
/// `Content-Type` header always leaves the headers and becomes the content
/// type unless the stamp sets one. Messages are persistent and stamped with
/// the current time by default.
fn publish_attributes(headers: &Headers, stamp: Option<&AmqpStamp>) -> MessageAttributes {
    let mut attributes = stamp
        .map(|stamp| stamp.attributes().clone())
        .unwrap_or_default();

    attributes
        .headers
        .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));

    if let Some(content_type) = attributes.headers.remove(CONTENT_TYPE_HEADER) {
        attributes.content_type.get_or_insert(content_type);
    }
    attributes
        .delivery_mode
        .get_or_insert(DELIVERY_MODE_PERSISTENT);
    attributes.timestamp.get_or_insert_with(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
    });

    attributes
}
