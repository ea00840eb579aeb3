// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Flags
//!
//! Declare, publish and nack flags share a single bitmask. The bit values
//! are the ones DSNs and option maps carry in their `flags` entries.

use bitflags::bitflags;

bitflags! {
    /// A set of AMQP flags.
    ///
    /// Bits without a name below are kept as given, so a `flags` option
    /// always round-trips.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const DURABLE = 2;
        const PASSIVE = 4;
        const EXCLUSIVE = 8;
        const AUTODELETE = 16;
        const INTERNAL = 32;
        const MANDATORY = 1024;
        const IMMEDIATE = 2048;
        const MULTIPLE = 4096;
        const NOWAIT = 8192;
        const REQUEUE = 16384;
    }
}

impl Flags {
    pub const NONE: Flags = Flags::empty();

    pub fn durable(self) -> bool {
        self.contains(Flags::DURABLE)
    }

    pub fn passive(self) -> bool {
        self.contains(Flags::PASSIVE)
    }

    pub fn exclusive(self) -> bool {
        self.contains(Flags::EXCLUSIVE)
    }

    pub fn auto_delete(self) -> bool {
        self.contains(Flags::AUTODELETE)
    }

    pub fn internal(self) -> bool {
        self.contains(Flags::INTERNAL)
    }

    pub fn no_wait(self) -> bool {
        self.contains(Flags::NOWAIT)
    }

    pub fn mandatory(self) -> bool {
        self.contains(Flags::MANDATORY)
    }

    pub fn immediate(self) -> bool {
        self.contains(Flags::IMMEDIATE)
    }

    pub fn requeue(self) -> bool {
        self.contains(Flags::REQUEUE)
    }

    pub fn multiple(self) -> bool {
        self.contains(Flags::MULTIPLE)
    }
}
