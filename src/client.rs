// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Client
//!
//! The production implementation of the [`crate::channel`] seam on top of
//! lapin. Every `lapin::Error` is logged here and turned into an
//! [`AmqpError`]; nothing above this module sees a lapin type.

use crate::{
    arguments::to_field_table,
    channel::{AmqpChannel, AmqpConnection, AmqpFactory},
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    flags::Flags,
    message::{BrokerMessage, Headers, MessageAttributes},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        ConfirmSelectOptions, QueueBindOptions, QueuePurgeOptions,
    },
    publisher_confirm::PublisherConfirm,
    tcp::OwnedTLSConfig,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo},
    BasicProperties, ConnectionProperties,
};
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, HashMap},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

const DEFAULT_LOGIN: &str = "guest";
const DEFAULT_PASSWORD: &str = "guest";

/// Connections opened through `pconnect`, shared by the whole process.
fn persistent_connections() -> &'static Mutex<HashMap<u64, Arc<lapin::Connection>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Arc<lapin::Connection>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Identifies a persistent connection by everything used to open it,
/// credentials and tuning included.
fn persistent_key(config: &ConnectionConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.host.hash(&mut hasher);
    config.port.hash(&mut hasher);
    config.vhost.hash(&mut hasher);
    config.login.hash(&mut hasher);
    config.password.hash(&mut hasher);
    config.tls.hash(&mut hasher);
    config.heartbeat.hash(&mut hasher);
    config.frame_max.hash(&mut hasher);
    config.channel_max.hash(&mut hasher);
    config.connect_timeout.hash(&mut hasher);
    hasher.finish()
}

/// Builds lapin-backed connections.
#[derive(Debug, Clone, Default)]
pub struct LapinFactory;

impl LapinFactory {
    pub fn new() -> LapinFactory {
        LapinFactory
    }
}

impl AmqpFactory for LapinFactory {
    fn create_connection(&self, config: &ConnectionConfig) -> Box<dyn AmqpConnection> {
        Box::new(LapinConnection::new(config.clone()))
    }
}

/// A lapin connection, opened on demand.
pub struct LapinConnection {
    config: ConnectionConfig,
    inner: Option<Arc<lapin::Connection>>,
}

impl LapinConnection {
    pub fn new(config: ConnectionConfig) -> LapinConnection {
        LapinConnection {
            config,
            inner: None,
        }
    }
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn connect(&mut self) -> Result<(), AmqpError> {
        let conn = open(&self.config).await?;
        self.inner = Some(Arc::new(conn));
        Ok(())
    }

    async fn pconnect(&mut self) -> Result<(), AmqpError> {
        let key = persistent_key(&self.config);

        let reusable = persistent_connections()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .filter(|conn| conn.status().connected())
            .cloned();

        if let Some(conn) = reusable {
            debug!(uri = self.config.redacted_uri(), "reusing persistent amqp connection");
            self.inner = Some(conn);
            return Ok(());
        }

        let conn = Arc::new(open(&self.config).await?);
        persistent_connections()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, conn.clone());
        self.inner = Some(conn);

        Ok(())
    }

    async fn create_channel(&self) -> Result<Box<dyn AmqpChannel>, AmqpError> {
        let Some(conn) = &self.inner else {
            error!("cannot create a channel before connecting");
            return Err(AmqpError::ChannelError);
        };

        debug!("creating amqp channel...");
        match conn.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Box::new(LapinChannel::new(channel)))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }
}

async fn open(config: &ConnectionConfig) -> Result<lapin::Connection, AmqpError> {
    let redacted = config.redacted_uri();
    debug!(uri = redacted, "creating amqp connection...");

    let uri = amqp_uri(config);
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(format!("amqp-transport-{}", Uuid::new_v4())));

    let result = match &config.tls {
        None => lapin::Connection::connect_uri(uri, options).await,
        Some(tls) => {
            if tls.cert.is_some() || tls.key.is_some() {
                warn!("client certificates are not supported, `cert` and `key` are ignored");
            }
            if !tls.verify {
                warn!("peer verification cannot be disabled, `verify` is ignored");
            }

            let cert_chain = match tokio::fs::read_to_string(&tls.cacert).await {
                Ok(pem) => pem,
                Err(err) => {
                    error!(error = err.to_string(), cacert = tls.cacert, "failure to read the CA certificate");
                    return Err(AmqpError::ConnectionError);
                }
            };

            lapin::Connection::connect_uri_with_config(
                uri,
                options,
                OwnedTLSConfig {
                    identity: None,
                    cert_chain: Some(cert_chain),
                },
            )
            .await
        }
    };

    match result {
        Ok(conn) => {
            debug!(uri = redacted, "amqp connected");
            Ok(conn)
        }
        Err(err) => {
            error!(
                error = redact(&err.to_string(), config.password.as_deref()),
                uri = redacted,
                "failure to connect"
            );
            Err(AmqpError::ConnectionError)
        }
    }
}

fn amqp_uri(config: &ConnectionConfig) -> AMQPUri {
    AMQPUri {
        scheme: if config.tls.is_some() {
            AMQPScheme::AMQPS
        } else {
            AMQPScheme::AMQP
        },
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: config.login.clone().unwrap_or_else(|| DEFAULT_LOGIN.to_owned()),
                password: config
                    .password
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PASSWORD.to_owned()),
            },
            host: config.host.clone(),
            port: config.port,
        },
        vhost: config.vhost.clone(),
        query: AMQPQueryString {
            frame_max: config.frame_max,
            channel_max: config.channel_max,
            heartbeat: config.heartbeat,
            connection_timeout: config
                .connect_timeout
                .map(|timeout| timeout.as_millis() as u64),
            ..Default::default()
        },
    }
}

fn redact(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, "****"),
        _ => text.to_owned(),
    }
}

/// A lapin channel with its outstanding publisher confirms.
pub struct LapinChannel {
    channel: lapin::Channel,
    confirm_mode: AtomicBool,
    pending_confirms: tokio::sync::Mutex<Vec<(String, PublisherConfirm)>>,
}

impl LapinChannel {
    pub fn new(channel: lapin::Channel) -> LapinChannel {
        LapinChannel {
            channel,
            confirm_mode: AtomicBool::new(false),
            pending_confirms: tokio::sync::Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn is_connected(&self) -> bool {
        self.channel.status().connected()
    }

    async fn confirm_select(&self) -> Result<(), AmqpError> {
        match self
            .channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to enable publisher confirms");
                Err(AmqpError::ConfirmSelectError)
            }
            _ => {
                self.confirm_mode.store(true, Ordering::Release);
                Ok(())
            }
        }
    }

    async fn wait_for_confirm(&self, timeout: Duration) -> Result<(), AmqpError> {
        let pending = std::mem::take(&mut *self.pending_confirms.lock().await);

        let confirmed = tokio::time::timeout(timeout, async move {
            for (exchange, confirm) in pending {
                match confirm.await {
                    Ok(confirmation) if confirmation.is_nack() => {
                        error!(exchange = exchange, "publish was nacked by the broker");
                        return Err(AmqpError::PublishNackError);
                    }
                    Err(err) => {
                        error!(error = err.to_string(), exchange = exchange, "error waiting for confirm");
                        return Err(AmqpError::PublishingError(exchange));
                    }
                    _ => {}
                }
            }
            Ok(())
        })
        .await;

        match confirmed {
            Ok(result) => result,
            Err(_) => {
                error!(timeout = ?timeout, "publish was not confirmed in time");
                Err(AmqpError::ConfirmTimeoutError(timeout))
            }
        }
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                lapin::ExchangeKind::from(&def.kind),
                def.into(),
                to_field_table(&def.params),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => Ok(()),
        }?;

        debug!("exchange: {} was created", def.name);
        Ok(())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<u32, AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(&def.name, def.into(), to_field_table(&def.arguments))
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            Ok(queue) => {
                debug!("queue: {} was created", def.name);
                Ok(queue.message_count())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                to_field_table(&binding.arguments),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        flags: Flags,
        attributes: &MessageAttributes,
    ) -> Result<(), AmqpError> {
        let confirm = match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: flags.mandatory(),
                    immediate: flags.immediate(),
                },
                body,
                properties(attributes),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), exchange = exchange, "error publishing message");
                Err(AmqpError::PublishingError(exchange.to_owned()))
            }
            Ok(confirm) => Ok(confirm),
        }?;

        // outside confirm mode every confirm resolves immediately
        if self.confirm_mode.load(Ordering::Acquire) {
            self.pending_confirms
                .lock()
                .await
                .push((exchange.to_owned(), confirm));
        }

        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<BrokerMessage>, AmqpError> {
        match self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = queue, "error to get message");
                Err(AmqpError::GetMessageError(queue.to_owned()))
            }
            Ok(message) => Ok(message.map(|message| broker_message(message.delivery))),
        }
    }

    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = queue, "error whiling ack msg");
                Err(AmqpError::AckMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn nack(&self, queue: &str, delivery_tag: u64, flags: Flags) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: flags.multiple(),
                    requeue: flags.requeue(),
                },
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = queue, "error whiling nack msg");
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn purge(&self, queue: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = queue, "error to purge queue");
                Err(AmqpError::PurgeQueueError(queue.to_owned()))
            }
            _ => Ok(()),
        }
    }
}

fn short(value: &str) -> ShortString {
    ShortString::from(value)
}

fn properties(attributes: &MessageAttributes) -> BasicProperties {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
    for (key, value) in &attributes.headers {
        headers.insert(
            short(key),
            AMQPValue::LongString(LongString::from(value.as_str())),
        );
    }

    let mut props = BasicProperties::default().with_headers(FieldTable::from(headers));

    if let Some(v) = &attributes.content_type {
        props = props.with_content_type(short(v));
    }
    if let Some(v) = &attributes.content_encoding {
        props = props.with_content_encoding(short(v));
    }
    if let Some(v) = attributes.delivery_mode {
        props = props.with_delivery_mode(v);
    }
    if let Some(v) = attributes.priority {
        props = props.with_priority(v);
    }
    if let Some(v) = attributes.timestamp {
        props = props.with_timestamp(v);
    }
    if let Some(v) = &attributes.app_id {
        props = props.with_app_id(short(v));
    }
    if let Some(v) = &attributes.message_id {
        props = props.with_message_id(short(v));
    }
    if let Some(v) = &attributes.user_id {
        props = props.with_user_id(short(v));
    }
    if let Some(v) = &attributes.expiration {
        props = props.with_expiration(short(v));
    }
    if let Some(v) = &attributes.kind {
        props = props.with_kind(short(v));
    }
    if let Some(v) = &attributes.reply_to {
        props = props.with_reply_to(short(v));
    }
    if let Some(v) = &attributes.correlation_id {
        props = props.with_correlation_id(short(v));
    }

    props
}

fn header_value(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(v) => Some(String::from_utf8_lossy(v.as_bytes()).into_owned()),
        AMQPValue::ShortString(v) => Some(v.as_str().to_owned()),
        AMQPValue::Boolean(v) => Some(v.to_string()),
        AMQPValue::ShortShortInt(v) => Some(v.to_string()),
        AMQPValue::ShortShortUInt(v) => Some(v.to_string()),
        AMQPValue::ShortInt(v) => Some(v.to_string()),
        AMQPValue::ShortUInt(v) => Some(v.to_string()),
        AMQPValue::LongInt(v) => Some(v.to_string()),
        AMQPValue::LongUInt(v) => Some(v.to_string()),
        AMQPValue::LongLongInt(v) => Some(v.to_string()),
        AMQPValue::Timestamp(v) => Some(v.to_string()),
        _ => None,
    }
}

fn opt_string(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|v| v.as_str().to_owned())
}

fn broker_message(delivery: Delivery) -> BrokerMessage {
    let props = &delivery.properties;

    let mut headers = Headers::new();
    if let Some(table) = props.headers() {
        for (key, value) in table.inner() {
            if let Some(value) = header_value(value) {
                headers.insert(key.as_str().to_owned(), value);
            }
        }
    }

    let attributes = MessageAttributes {
        headers,
        content_type: opt_string(props.content_type()),
        content_encoding: opt_string(props.content_encoding()),
        delivery_mode: *props.delivery_mode(),
        priority: *props.priority(),
        timestamp: *props.timestamp(),
        app_id: opt_string(props.app_id()),
        message_id: opt_string(props.message_id()),
        user_id: opt_string(props.user_id()),
        expiration: opt_string(props.expiration()),
        kind: opt_string(props.kind()),
        reply_to: opt_string(props.reply_to()),
        correlation_id: opt_string(props.correlation_id()),
    };

    BrokerMessage {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.as_str().to_owned(),
        routing_key: delivery.routing_key.as_str().to_owned(),
        redelivered: delivery.redelivered,
        attributes,
        body: delivery.data,
    }
}
