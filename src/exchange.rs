// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! This module defines the exchange types the transport can declare and a
//! builder describing one exchange declaration: the main exchange messages
//! are published to, and the direct exchange carrying delayed messages.

use crate::{arguments::Arguments, flags::Flags};

/// Represents the types of exchanges the broker routes with.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - Custom: Plugin provided types such as `x-delayed-message`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    #[default]
    Fanout,
    Topic,
    Headers,
    Custom(String),
}

impl ExchangeKind {
    /// Parses the `type` option of an exchange.
    pub fn from_name(name: &str) -> ExchangeKind {
        match name {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            other => ExchangeKind::Custom(other.to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Custom(name) => name,
        }
    }
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Custom(name) => lapin::ExchangeKind::Custom(name.clone()),
        }
    }
}

/// Definition of an exchange with its declaration parameters.
///
/// Built with a fluent API and handed to the channel for declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub name: String,
    pub kind: ExchangeKind,
    pub flags: Flags,
    pub params: Arguments,
}

impl ExchangeDefinition {
    /// Creates a new durable fanout exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Fanout,
            flags: Flags::DURABLE,
            params: Arguments::default(),
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange type to Direct.
    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    /// Replaces the declaration flags.
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the exchange arguments.
    pub fn params(mut self, params: Arguments) -> Self {
        self.params = params;
        self
    }
}

impl From<&ExchangeDefinition> for lapin::options::ExchangeDeclareOptions {
    fn from(def: &ExchangeDefinition) -> Self {
        lapin::options::ExchangeDeclareOptions {
            passive: def.flags.passive(),
            durable: def.flags.durable(),
            auto_delete: def.flags.auto_delete(),
            internal: def.flags.internal(),
            nowait: def.flags.no_wait(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_known_and_custom_kinds() {
        assert_eq!(ExchangeKind::from_name("topic"), ExchangeKind::Topic);
        assert_eq!(
            ExchangeKind::from_name("x-delayed-message"),
            ExchangeKind::Custom("x-delayed-message".to_owned())
        );
        assert_eq!(ExchangeKind::default().name(), "fanout");
    }

    #[test]
    fn should_map_flags_to_declare_options() {
        let def = ExchangeDefinition::new("messages").flags(Flags::DURABLE | Flags::PASSIVE);
        let opts = lapin::options::ExchangeDeclareOptions::from(&def);

        assert!(opts.durable);
        assert!(opts.passive);
        assert!(!opts.auto_delete);
    }
}
