// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Envelope Stamps
//!
//! Metadata attached to an [`crate::envelope::Envelope`]. The transport reads
//! [`AmqpStamp`] (routing hints), [`DelayStamp`] and [`RedeliveryStamp`] on
//! send, and attaches [`AmqpReceivedStamp`] on receive.

use crate::{
    flags::Flags,
    message::{BrokerMessage, MessageAttributes},
};
use serde::{Deserialize, Serialize};

/// Routing key, publish flags and broker attributes for one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmqpStamp {
    routing_key: Option<String>,
    flags: Flags,
    attributes: MessageAttributes,
    is_retry_attempt: bool,
}

impl AmqpStamp {
    pub fn new(routing_key: Option<&str>, flags: Flags, attributes: MessageAttributes) -> AmqpStamp {
        AmqpStamp {
            routing_key: routing_key.map(str::to_owned),
            flags,
            attributes,
            is_retry_attempt: false,
        }
    }

    /// A stamp carrying only broker attributes, keeping the routing of `previous`.
    pub fn with_attributes(attributes: MessageAttributes, previous: Option<&AmqpStamp>) -> AmqpStamp {
        match previous {
            Some(previous) => AmqpStamp {
                routing_key: previous.routing_key.clone(),
                flags: previous.flags,
                attributes: previous.attributes.clone().or(&attributes),
                is_retry_attempt: previous.is_retry_attempt,
            },
            None => AmqpStamp::new(None, Flags::NONE, attributes),
        }
    }

    /// Builds the stamp for re-sending a message received from AMQP.
    ///
    /// Attributes set on `previous` win, every other attribute is copied from
    /// the received message. With a `retry_routing_key` the stamp becomes a
    /// retry attempt routed with that key; otherwise the routing key of
    /// `previous`, or the one the message was received with, is kept.
    pub fn from_received(
        received: &BrokerMessage,
        previous: Option<&AmqpStamp>,
        retry_routing_key: Option<&str>,
    ) -> AmqpStamp {
        let attributes = previous
            .map(|stamp| stamp.attributes.clone())
            .unwrap_or_default()
            .or(&received.attributes);
        let flags = previous.map_or(Flags::NONE, |stamp| stamp.flags);

        match retry_routing_key {
            Some(key) => AmqpStamp {
                routing_key: Some(key.to_owned()),
                flags,
                attributes,
                is_retry_attempt: true,
            },
            None => AmqpStamp {
                routing_key: previous
                    .and_then(|stamp| stamp.routing_key.clone())
                    .or_else(|| Some(received.routing_key.clone())),
                flags,
                attributes,
                is_retry_attempt: false,
            },
        }
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn attributes(&self) -> &MessageAttributes {
        &self.attributes
    }

    pub fn is_retry_attempt(&self) -> bool {
        self.is_retry_attempt
    }
}

/// The broker message an envelope was decoded from and the queue it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpReceivedStamp {
    message: BrokerMessage,
    queue_name: String,
}

impl AmqpReceivedStamp {
    pub fn new(message: BrokerMessage, queue_name: &str) -> AmqpReceivedStamp {
        AmqpReceivedStamp {
            message,
            queue_name: queue_name.to_owned(),
        }
    }

    pub fn message(&self) -> &BrokerMessage {
        &self.message
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// Requested delivery delay in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayStamp {
    pub delay: u64,
}

impl DelayStamp {
    pub fn new(delay_ms: u64) -> DelayStamp {
        DelayStamp { delay: delay_ms }
    }
}

/// Marks a message being sent again after a failed handling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeliveryStamp {
    pub retry_count: u32,
}

impl RedeliveryStamp {
    pub fn new(retry_count: u32) -> RedeliveryStamp {
        RedeliveryStamp { retry_count }
    }
}

/// Every stamp kind an envelope can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stamp {
    Amqp(AmqpStamp),
    AmqpReceived(AmqpReceivedStamp),
    Delay(DelayStamp),
    Redelivery(RedeliveryStamp),
}

/// Typed access to one [`Stamp`] variant.
pub trait StampKind: Sized {
    fn from_stamp(stamp: &Stamp) -> Option<&Self>;
}

macro_rules! stamp_kind {
    ($ty:ty, $variant:ident) => {
        impl StampKind for $ty {
            fn from_stamp(stamp: &Stamp) -> Option<&Self> {
                match stamp {
                    Stamp::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Stamp {
            fn from(stamp: $ty) -> Stamp {
                Stamp::$variant(stamp)
            }
        }
    };
}

stamp_kind!(AmqpStamp, Amqp);
stamp_kind!(AmqpReceivedStamp, AmqpReceived);
stamp_kind!(DelayStamp, Delay);
stamp_kind!(RedeliveryStamp, Redelivery);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Headers;

    fn received() -> BrokerMessage {
        let mut headers = Headers::new();
        headers.insert("type".to_owned(), "App\\Event".to_owned());

        BrokerMessage {
            body: b"{}".to_vec(),
            delivery_tag: 7,
            exchange: "messages".to_owned(),
            routing_key: "order.created".to_owned(),
            redelivered: false,
            attributes: MessageAttributes {
                headers,
                priority: Some(4),
                correlation_id: Some("abc".to_owned()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn should_carry_received_attributes_and_routing_key() {
        let stamp = AmqpStamp::from_received(&received(), None, None);

        assert_eq!(stamp.routing_key(), Some("order.created"));
        assert_eq!(stamp.attributes().priority, Some(4));
        assert_eq!(stamp.attributes().correlation_id.as_deref(), Some("abc"));
        assert!(!stamp.is_retry_attempt());
    }

    #[test]
    fn should_route_a_retry_to_the_originating_queue() {
        let previous = AmqpStamp::new(
            Some("ignored"),
            Flags::MANDATORY,
            MessageAttributes {
                priority: Some(9),
                ..Default::default()
            },
        );

        let stamp = AmqpStamp::from_received(&received(), Some(&previous), Some("orders"));

        assert_eq!(stamp.routing_key(), Some("orders"));
        assert!(stamp.is_retry_attempt());
        assert_eq!(stamp.flags(), Flags::MANDATORY);
        assert_eq!(stamp.attributes().priority, Some(9));
        assert_eq!(stamp.attributes().correlation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn should_keep_previous_routing_when_adding_attributes() {
        let previous = AmqpStamp::new(Some("rk"), Flags::NONE, MessageAttributes::default());

        let stamp = AmqpStamp::with_attributes(
            MessageAttributes {
                content_type: Some("application/json".to_owned()),
                ..Default::default()
            },
            Some(&previous),
        );

        assert_eq!(stamp.routing_key(), Some("rk"));
        assert_eq!(stamp.attributes().content_type.as_deref(), Some("application/json"));
    }
}
