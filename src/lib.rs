// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Messenger Transport
//!
//! Sends and receives message envelopes through an AMQP 0-9-1 broker:
//! DSN-driven configuration, topology auto-setup, delayed delivery and
//! retries through dead-lettering delay queues, and publisher confirms.
//!
//! [`transport::AmqpTransportFactory`] is the usual entry point. Broker
//! access goes through the [`channel`] seam, implemented on top of lapin by
//! [`client`].

mod otel;

pub mod arguments;
pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod delay;
pub mod dsn;
pub mod envelope;
pub mod errors;
pub mod exchange;
pub mod flags;
pub mod message;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod serializer;
pub mod stamps;
pub mod topology;
pub mod transport;
