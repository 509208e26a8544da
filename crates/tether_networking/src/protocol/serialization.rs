//! # Frame Serialization
//!
//! Builds frames op by op under a byte budget, and reads ops back out of a
//! received body.
//!
//! ## Design
//!
//! - Writers never split an op: an op either fits whole or is refused
//! - Readers stop at the first malformed op; everything before it is valid
//! - All integers are little-endian

use bytemuck::bytes_of;
use tether_core::{ComponentTypeId, InstanceId, NetId, Tick};

use super::frame::FrameHeader;
use super::ops::{ComponentPayload, Hello, Op, OpCode};
use crate::error::WireError;

/// Frame serializer - appends ops to a growable buffer under a body budget.
///
/// Reuse is by value: [`FrameWriter::finish`] hands out the buffer.
pub struct FrameWriter {
    buffer: Vec<u8>,
    max_body: usize,
    ops: usize,
}

impl FrameWriter {
    /// Creates a writer whose body may not exceed `max_body` bytes.
    #[must_use]
    pub fn new(max_body: usize) -> Self {
        let mut buffer = Vec::with_capacity(FrameHeader::SIZE + max_body.min(4096));
        buffer.extend_from_slice(bytes_of(&FrameHeader::new(0)));
        Self {
            buffer,
            max_body,
            ops: 0,
        }
    }

    /// Body bytes written so far.
    #[inline]
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.buffer.len() - FrameHeader::SIZE
    }

    /// Body bytes still available.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.max_body.saturating_sub(self.body_len())
    }

    /// Number of ops written.
    #[inline]
    #[must_use]
    pub const fn op_count(&self) -> usize {
        self.ops
    }

    /// Returns true if no op has been written.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ops == 0
    }

    /// Returns true if `op` would fit in an empty frame of this budget.
    #[inline]
    #[must_use]
    pub fn fits_empty(&self, op: &Op) -> bool {
        op.encoded_len() <= self.max_body
    }

    /// Appends `op` if it fits. Returns false (buffer untouched) otherwise.
    pub fn push(&mut self, op: &Op) -> bool {
        if op.encoded_len() > self.remaining() {
            return false;
        }
        self.write_op(op);
        self.ops += 1;
        true
    }

    /// Seals the header and returns the complete frame.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let len = u32::try_from(self.body_len()).unwrap_or(u32::MAX);
        self.buffer[..FrameHeader::SIZE].copy_from_slice(bytes_of(&FrameHeader::new(len)));
        self.buffer
    }

    #[inline]
    fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    #[inline]
    fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn write_net_id(&mut self, net_id: NetId) {
        self.write_u64(net_id.origin.0);
        self.write_u64(net_id.serial);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        // Lengths are bounded by the frame budget, far below u32::MAX.
        self.write_u32(bytes.len() as u32);
        self.buffer.extend_from_slice(bytes);
    }

    fn write_op(&mut self, op: &Op) {
        self.write_u8(op.code() as u8);
        match op {
            Op::Hello(hello) => {
                self.write_u32(hello.magic);
                self.write_u16(hello.major);
                self.write_u16(hello.minor);
                self.write_u64(hello.instance.0);
            }
            Op::Spawn {
                net_id,
                tick,
                components,
            } => {
                self.write_net_id(*net_id);
                self.write_u64(tick.0);
                self.write_u16(components.len() as u16);
                for component in components {
                    self.write_u16(component.type_id.0);
                    self.write_bytes(&component.bytes);
                }
            }
            Op::Update {
                net_id,
                type_id,
                tick,
                bytes,
            } => {
                self.write_net_id(*net_id);
                self.write_u16(type_id.0);
                self.write_u64(tick.0);
                self.write_bytes(bytes);
            }
            Op::Remove {
                net_id,
                type_id,
                tick,
            } => {
                self.write_net_id(*net_id);
                self.write_u16(type_id.0);
                self.write_u64(tick.0);
            }
            Op::Despawn { net_id, tick } => {
                self.write_net_id(*net_id);
                self.write_u64(tick.0);
            }
            Op::Heartbeat => {}
            Op::Ack { tick } | Op::SnapshotBegin { tick } | Op::SnapshotEnd { tick } => {
                self.write_u64(tick.0);
            }
        }
    }
}

/// Encodes a frame holding exactly one op.
///
/// # Errors
///
/// Returns [`WireError::OpTooLarge`] if the op exceeds `max_body`.
pub fn encode_single(op: &Op, max_body: usize) -> Result<Vec<u8>, WireError> {
    let mut writer = FrameWriter::new(max_body);
    if !writer.push(op) {
        return Err(WireError::OpTooLarge {
            len: op.encoded_len(),
            max: max_body,
        });
    }
    Ok(writer.finish())
}

/// Returns true if a body holds nothing but heartbeats.
#[must_use]
pub fn is_heartbeat_only(body: &[u8]) -> bool {
    !body.is_empty() && body.iter().all(|b| *b == OpCode::Heartbeat as u8)
}

/// Op deserializer - reads ops from a frame body.
pub struct OpReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> OpReader<'a> {
    /// Creates a reader over a frame body.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated { what });
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn read_u16(&mut self, what: &'static str) -> Result<u16, WireError> {
        self.read_array(what).map(u16::from_le_bytes)
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32, WireError> {
        self.read_array(what).map(u32::from_le_bytes)
    }

    fn read_u64(&mut self, what: &'static str) -> Result<u64, WireError> {
        self.read_array(what).map(u64::from_le_bytes)
    }

    fn read_tick(&mut self) -> Result<Tick, WireError> {
        self.read_u64("tick").map(Tick)
    }

    fn read_net_id(&mut self) -> Result<NetId, WireError> {
        let origin = self.read_u64("net id origin")?;
        let serial = self.read_u64("net id serial")?;
        Ok(NetId::new(InstanceId(origin), serial))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.read_u32("payload length")? as usize;
        self.take(len, "payload").map(<[u8]>::to_vec)
    }

    /// Reads the next op. `Ok(None)` at the end of the body.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownOpCode`] or [`WireError::Truncated`]; the reader
    /// should not be used after an error.
    pub fn next_op(&mut self) -> Result<Option<Op>, WireError> {
        let Some(&code) = self.buffer.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let code = OpCode::from_u8(code).ok_or(WireError::UnknownOpCode(code))?;

        let op = match code {
            OpCode::Hello => Op::Hello(Hello {
                magic: self.read_u32("hello magic")?,
                major: self.read_u16("hello major")?,
                minor: self.read_u16("hello minor")?,
                instance: InstanceId(self.read_u64("hello instance")?),
            }),
            OpCode::Spawn => {
                let net_id = self.read_net_id()?;
                let tick = self.read_tick()?;
                let count = self.read_u16("component count")?;
                let mut components = Vec::with_capacity(usize::from(count).min(64));
                for _ in 0..count {
                    let type_id = ComponentTypeId(self.read_u16("type id")?);
                    let bytes = self.read_bytes()?;
                    components.push(ComponentPayload { type_id, bytes });
                }
                Op::Spawn {
                    net_id,
                    tick,
                    components,
                }
            }
            OpCode::Update => Op::Update {
                net_id: self.read_net_id()?,
                type_id: ComponentTypeId(self.read_u16("type id")?),
                tick: self.read_tick()?,
                bytes: self.read_bytes()?,
            },
            OpCode::Remove => Op::Remove {
                net_id: self.read_net_id()?,
                type_id: ComponentTypeId(self.read_u16("type id")?),
                tick: self.read_tick()?,
            },
            OpCode::Despawn => Op::Despawn {
                net_id: self.read_net_id()?,
                tick: self.read_tick()?,
            },
            OpCode::Heartbeat => Op::Heartbeat,
            OpCode::Ack => Op::Ack {
                tick: self.read_tick()?,
            },
            OpCode::SnapshotBegin => Op::SnapshotBegin {
                tick: self.read_tick()?,
            },
            OpCode::SnapshotEnd => Op::SnapshotEnd {
                tick: self.read_tick()?,
            },
        };
        Ok(Some(op))
    }
}
