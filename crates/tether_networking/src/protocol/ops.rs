//! # Replication Operations
//!
//! The operations a frame can carry, with their exact encoded sizes so the
//! encoder can pack frames without serializing twice.

use tether_core::{ComponentTypeId, InstanceId, NetId, Tick};

use crate::{PROTOCOL_MAGIC, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR};

/// Wire size of a [`NetId`] (origin u64 + serial u64).
pub const NET_ID_SIZE: usize = 16;

/// Operation codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Handshake, first frame in each direction.
    Hello = 0x01,
    /// New entity with its full component set.
    Spawn = 0x02,
    /// One component value.
    Update = 0x03,
    /// One component removed.
    Remove = 0x04,
    /// Entity destroyed.
    Despawn = 0x05,
    /// Keep-alive.
    Heartbeat = 0x06,
    /// Newest remote tick applied.
    Ack = 0x07,
    /// Start of a full-state snapshot.
    SnapshotBegin = 0x08,
    /// End of a full-state snapshot.
    SnapshotEnd = 0x09,
}

impl OpCode {
    /// Parses an op code byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Spawn),
            0x03 => Some(Self::Update),
            0x04 => Some(Self::Remove),
            0x05 => Some(Self::Despawn),
            0x06 => Some(Self::Heartbeat),
            0x07 => Some(Self::Ack),
            0x08 => Some(Self::SnapshotBegin),
            0x09 => Some(Self::SnapshotEnd),
            _ => None,
        }
    }
}

/// Handshake payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hello {
    /// Must equal [`PROTOCOL_MAGIC`].
    pub magic: u32,
    /// Incompatible changes bump this.
    pub major: u16,
    /// Compatible additions bump this.
    pub minor: u16,
    /// Sender's instance id.
    pub instance: InstanceId,
}

impl Hello {
    /// Hello for this build.
    #[must_use]
    pub const fn new(instance: InstanceId) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            major: PROTOCOL_VERSION_MAJOR,
            minor: PROTOCOL_VERSION_MINOR,
            instance,
        }
    }

    /// Encoded size including the op code.
    pub const SIZE: usize = 1 + 4 + 2 + 2 + 8;
}

/// One component inside a `Spawn`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentPayload {
    /// Component wire id.
    pub type_id: ComponentTypeId,
    /// Serialized value.
    pub bytes: Vec<u8>,
}

impl ComponentPayload {
    /// Encoded size inside a `Spawn`.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        2 + 4 + self.bytes.len()
    }
}

/// A decoded operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Handshake.
    Hello(Hello),
    /// New entity with its full component set.
    Spawn {
        /// Entity identity.
        net_id: NetId,
        /// Sender tick.
        tick: Tick,
        /// Every replicable component.
        components: Vec<ComponentPayload>,
    },
    /// One component value.
    Update {
        /// Entity identity.
        net_id: NetId,
        /// Component wire id.
        type_id: ComponentTypeId,
        /// Tick of the write.
        tick: Tick,
        /// Serialized value.
        bytes: Vec<u8>,
    },
    /// One component removed.
    Remove {
        /// Entity identity.
        net_id: NetId,
        /// Component wire id.
        type_id: ComponentTypeId,
        /// Tick of the removal.
        tick: Tick,
    },
    /// Entity destroyed.
    Despawn {
        /// Entity identity.
        net_id: NetId,
        /// Tick of the despawn.
        tick: Tick,
    },
    /// Keep-alive.
    Heartbeat,
    /// Newest remote tick applied by the sender.
    Ack {
        /// The acknowledged tick.
        tick: Tick,
    },
    /// Start of a full-state snapshot.
    SnapshotBegin {
        /// Sender tick.
        tick: Tick,
    },
    /// End of a full-state snapshot.
    SnapshotEnd {
        /// Sender tick.
        tick: Tick,
    },
}

impl Op {
    /// Returns the op code.
    #[must_use]
    pub const fn code(&self) -> OpCode {
        match self {
            Self::Hello(_) => OpCode::Hello,
            Self::Spawn { .. } => OpCode::Spawn,
            Self::Update { .. } => OpCode::Update,
            Self::Remove { .. } => OpCode::Remove,
            Self::Despawn { .. } => OpCode::Despawn,
            Self::Heartbeat => OpCode::Heartbeat,
            Self::Ack { .. } => OpCode::Ack,
            Self::SnapshotBegin { .. } => OpCode::SnapshotBegin,
            Self::SnapshotEnd { .. } => OpCode::SnapshotEnd,
        }
    }

    /// Exact encoded size including the op code byte.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Hello(_) => Hello::SIZE - 1,
            Self::Spawn { components, .. } => {
                NET_ID_SIZE
                    + 8
                    + 2
                    + components.iter().map(ComponentPayload::encoded_len).sum::<usize>()
            }
            Self::Update { bytes, .. } => NET_ID_SIZE + 2 + 8 + 4 + bytes.len(),
            Self::Remove { .. } => NET_ID_SIZE + 2 + 8,
            Self::Despawn { .. } => NET_ID_SIZE + 8,
            Self::Heartbeat => 0,
            Self::Ack { .. } | Self::SnapshotBegin { .. } | Self::SnapshotEnd { .. } => 8,
        }
    }

    /// The entity this op targets, if any.
    #[must_use]
    pub const fn net_id(&self) -> Option<NetId> {
        match self {
            Self::Spawn { net_id, .. }
            | Self::Update { net_id, .. }
            | Self::Remove { net_id, .. }
            | Self::Despawn { net_id, .. } => Some(*net_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_parse() {
        for code in 0x01..=0x09u8 {
            assert_eq!(OpCode::from_u8(code).map(|c| c as u8), Some(code));
        }
        assert_eq!(OpCode::from_u8(0), None);
        assert_eq!(OpCode::from_u8(0x0a), None);
    }

    #[test]
    fn test_encoded_len() {
        let net_id = NetId::new(InstanceId(1), 2);
        let spawn = Op::Spawn {
            net_id,
            tick: Tick(1),
            components: vec![ComponentPayload {
                type_id: ComponentTypeId(2),
                bytes: vec![0; 12],
            }],
        };
        assert_eq!(spawn.encoded_len(), 1 + 16 + 8 + 2 + (2 + 4 + 12));
        assert_eq!(Op::Heartbeat.encoded_len(), 1);
        assert_eq!(Op::Hello(Hello::new(InstanceId(3))).encoded_len(), Hello::SIZE);
        assert_eq!(spawn.net_id(), Some(net_id));
    }
}
