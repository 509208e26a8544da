//! # Framing
//!
//! Every frame is a fixed 4-byte little-endian length header followed by
//! that many body bytes. The assembler accumulates bytes across partial
//! reads and hands out complete bodies.
//!
//! ```text
//! WaitingForHeader --4 bytes--> WaitingForBody(len) --len bytes--> Dispatch
//!        ^                                                             |
//!        +-------------------------------------------------------------+
//! ```

use bytemuck::{Pod, Zeroable};

use crate::error::WireError;

/// Frame header.
///
/// Total size: 4 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameHeader {
    /// Body length in bytes, little-endian on the wire.
    len_le: u32,
}

impl FrameHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 4;

    /// Creates a header for a body of `len` bytes.
    #[inline]
    #[must_use]
    pub const fn new(len: u32) -> Self {
        Self { len_le: len.to_le() }
    }

    /// Body length.
    #[inline]
    #[must_use]
    pub const fn body_len(&self) -> usize {
        u32::from_le(self.len_le) as usize
    }
}

/// Receive state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblerState {
    /// Need the 4 header bytes.
    WaitingForHeader,
    /// Header read; need this many body bytes.
    WaitingForBody(usize),
}

/// Reassembles frames from an arbitrary split byte stream.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    state: AssemblerState,
    max_body: usize,
}

impl FrameAssembler {
    /// Creates an assembler that rejects bodies larger than `max_body`.
    #[must_use]
    pub fn new(max_body: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_body.min(64 * 1024) + FrameHeader::SIZE),
            state: AssemblerState::WaitingForHeader,
            max_body,
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> AssemblerState {
        self.state
    }

    /// Bytes received but not yet dispatched.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = AssemblerState::WaitingForHeader;
    }

    /// Returns the next complete body, if one has fully arrived.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::FrameTooLarge`] if a header announces a body over
    /// the limit. The stream cannot be resynchronised after that.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        loop {
            match self.state {
                AssemblerState::WaitingForHeader => {
                    if self.buffer.len() < FrameHeader::SIZE {
                        return Ok(None);
                    }
                    let header: FrameHeader =
                        bytemuck::pod_read_unaligned(&self.buffer[..FrameHeader::SIZE]);
                    let len = header.body_len();
                    if len > self.max_body {
                        return Err(WireError::FrameTooLarge {
                            len,
                            max: self.max_body,
                        });
                    }
                    self.buffer.drain(..FrameHeader::SIZE);
                    self.state = AssemblerState::WaitingForBody(len);
                }
                AssemblerState::WaitingForBody(len) => {
                    if self.buffer.len() < len {
                        return Ok(None);
                    }
                    // Dispatch
                    let body: Vec<u8> = self.buffer.drain(..len).collect();
                    self.state = AssemblerState::WaitingForHeader;
                    return Ok(Some(body));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = bytemuck::bytes_of(&FrameHeader::new(body.len() as u32)).to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_header_is_little_endian() {
        let header = FrameHeader::new(0x0102_0304);
        assert_eq!(bytemuck::bytes_of(&header), &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(header.body_len(), 0x0102_0304);
    }

    #[test]
    fn test_byte_by_byte_delivery() {
        let mut assembler = FrameAssembler::new(1024);
        let mut stream = frame(&[6]);
        stream.extend(frame(&[7, 0, 0, 0, 0, 0, 0, 0, 9]));

        let mut bodies = Vec::new();
        for byte in stream {
            assembler.push(&[byte]);
            while let Some(body) = assembler.next_frame().unwrap() {
                bodies.push(body);
            }
        }

        assert_eq!(bodies, vec![vec![6], vec![7, 0, 0, 0, 0, 0, 0, 0, 9]]);
        assert_eq!(assembler.state(), AssemblerState::WaitingForHeader);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_partial_body_waits() {
        let mut assembler = FrameAssembler::new(1024);
        let stream = frame(&[1, 2, 3, 4]);
        assembler.push(&stream[..6]);
        assert_eq!(assembler.next_frame().unwrap(), None);
        assert_eq!(assembler.state(), AssemblerState::WaitingForBody(4));

        assembler.push(&stream[6..]);
        assert_eq!(assembler.next_frame().unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut assembler = FrameAssembler::new(8);
        assembler.push(&frame(&[0; 9]));
        assert_eq!(
            assembler.next_frame(),
            Err(WireError::FrameTooLarge { len: 9, max: 8 })
        );
    }

    #[test]
    fn test_empty_body() {
        let mut assembler = FrameAssembler::new(8);
        assembler.push(&frame(&[]));
        assert_eq!(assembler.next_frame().unwrap(), Some(Vec::new()));
    }
}
