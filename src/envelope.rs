// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Envelopes
//!
//! A message together with the ordered list of stamps describing how it was,
//! or should be, transported.

use crate::stamps::{Stamp, StampKind};

/// An application message: its type name and its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: String,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(kind: &str, body: impl Into<Vec<u8>>) -> Message {
        Message {
            kind: kind.to_owned(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    message: Message,
    stamps: Vec<Stamp>,
}

impl Envelope {
    pub fn new(message: Message) -> Envelope {
        Envelope {
            message,
            stamps: vec![],
        }
    }

    /// Appends a stamp.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with(mut self, stamp: impl Into<Stamp>) -> Self {
        self.stamps.push(stamp.into());
        self
    }

    /// Appends every stamp in order.
    pub fn with_all(mut self, stamps: impl IntoIterator<Item = Stamp>) -> Self {
        self.stamps.extend(stamps);
        self
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn stamps(&self) -> &[Stamp] {
        &self.stamps
    }

    /// The most recently added stamp of kind `S`.
    pub fn last<S: StampKind>(&self) -> Option<&S> {
        self.stamps.iter().rev().find_map(S::from_stamp)
    }

    /// Every stamp of kind `S`, oldest first.
    pub fn all<S: StampKind>(&self) -> Vec<&S> {
        self.stamps.iter().filter_map(S::from_stamp).collect()
    }
}
