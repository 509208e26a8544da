//! # Change Stamps
//!
//! Every component slot records when it was last written and by whom.
//! The replication layer compares these stamps against the tick it last
//! scanned for a peer, and uses the origin to avoid echoing a peer's own
//! writes back to it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical timestamp, one per control-loop iteration.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    /// The tick before anything happened.
    pub const ZERO: Self = Self(0);

    /// Returns the following tick.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Number of ticks from `earlier` to `self` (zero if `earlier` is later).
    #[inline]
    #[must_use]
    pub const fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Handle naming one peer connection slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerToken(pub u32);

impl fmt::Display for PeerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Where a write came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// Local logic (sensors, control, operator input).
    Local,
    /// Applied from a peer's replication stream.
    Peer(PeerToken),
}

impl ChangeOrigin {
    /// Returns true if the write was applied from `peer`.
    #[inline]
    #[must_use]
    pub fn is_from(self, peer: PeerToken) -> bool {
        self == Self::Peer(peer)
    }
}

/// Tick and origin of the last write to a component slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeStamp {
    /// Tick of the write.
    pub tick: Tick,
    /// Origin of the write.
    pub origin: ChangeOrigin,
}

impl ChangeStamp {
    /// Creates a stamp.
    #[inline]
    #[must_use]
    pub const fn new(tick: Tick, origin: ChangeOrigin) -> Self {
        Self { tick, origin }
    }

    /// True if this write happened after `tick` and did not come from `peer`.
    #[inline]
    #[must_use]
    pub fn is_pending_for(&self, peer: PeerToken, tick: Tick) -> bool {
        self.tick > tick && !self.origin.is_from(peer)
    }
}
