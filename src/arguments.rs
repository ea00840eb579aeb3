// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Declare and Bind Arguments
//!
//! AMQP-native `x-*` arguments attached to queue/exchange declarations and
//! queue bindings, and their conversion into lapin field tables.

use lapin::types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString};
use std::{collections::BTreeMap, fmt};

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_ARGS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the argument used to specify a dead letter routing key
pub const AMQP_ARGS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the argument used by the delayed-message plugin
pub const AMQP_ARGS_DELAY: &str = "x-delay";
/// Constant for the argument used to expire an unused queue
pub const AMQP_ARGS_EXPIRES: &str = "x-expires";
/// Constant for the argument used to specify maximum queue length
pub const AMQP_ARGS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the argument used to specify maximum queue size in bytes
pub const AMQP_ARGS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";
/// Constant for the argument used to enable queue priorities
pub const AMQP_ARGS_MAX_PRIORITY: &str = "x-max-priority";
/// Constant for the argument used to specify message TTL
pub const AMQP_ARGS_MESSAGE_TTL: &str = "x-message-ttl";

/// Queue arguments the broker only accepts as integers.
pub const INTEGER_ARGUMENTS: [&str; 6] = [
    AMQP_ARGS_DELAY,
    AMQP_ARGS_EXPIRES,
    AMQP_ARGS_MAX_LENGTH,
    AMQP_ARGS_MAX_LENGTH_BYTES,
    AMQP_ARGS_MAX_PRIORITY,
    AMQP_ARGS_MESSAGE_TTL,
];

/// A scalar argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    Int(i64),
    Bool(bool),
    String(String),
}

impl ArgumentValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgumentValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgumentValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentValue::Int(v) => write!(f, "{v}"),
            ArgumentValue::Bool(v) => write!(f, "{v}"),
            ArgumentValue::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ArgumentValue {
    fn from(value: i64) -> Self {
        ArgumentValue::Int(value)
    }
}

impl From<bool> for ArgumentValue {
    fn from(value: bool) -> Self {
        ArgumentValue::Bool(value)
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        ArgumentValue::String(value.to_owned())
    }
}

impl From<String> for ArgumentValue {
    fn from(value: String) -> Self {
        ArgumentValue::String(value)
    }
}

impl From<&ArgumentValue> for AMQPValue {
    fn from(value: &ArgumentValue) -> Self {
        match value {
            ArgumentValue::Int(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            ArgumentValue::Bool(v) => AMQPValue::Boolean(*v),
            ArgumentValue::String(v) => AMQPValue::LongString(LongString::from(v.as_str())),
        }
    }
}

/// Named arguments, ordered by key.
pub type Arguments = BTreeMap<String, ArgumentValue>;

/// Converts arguments into the lapin field table sent on the wire.
pub fn to_field_table(args: &Arguments) -> FieldTable {
    let mut btree = BTreeMap::<ShortString, AMQPValue>::default();
    for (key, value) in args {
        btree.insert(ShortString::from(key.as_str()), AMQPValue::from(value));
    }

    FieldTable::from(btree)
}
