//! Mode and submode bytes, gathered in one place so the factory and parser agree on them.
//!
//! The modes marked "bit-exact" are given literally in the distilled specification's wire
//! framing table and literal test scenarios. The submodes grouped under `0x3C`/`0x3D`/`0x27`
//! are this crate's own, internally-consistent assignment for traffic the spec describes only
//! at the behavioural level (§9: "validate against PCM documentation where bit-level details
//! ... are uncertain").

/// Block write (VIN/serial/BCC/MEC). Bit-exact.
pub const MODE_WRITE_BLOCK: u8 = 0x3B;
/// Write acknowledgement. Bit-exact.
pub const MODE_WRITE_ACK: u8 = 0x7B;
/// Mode command (start-of-write, exit-kernel, chatter suppression, keep-alive, 4x negotiation).
/// Bit-exact as a mode byte; submodes below are this crate's assignment.
pub const MODE_COMMAND: u8 = 0x3C;
/// Upload permission request (kernel upload). Bit-exact.
pub const MODE_UPLOAD_REQUEST: u8 = 0x34;
/// Bulk read request. Bit-exact.
pub const MODE_READ_REQUEST: u8 = 0x35;
/// Block data with checksum: kernel chunks, flash write chunks, bulk read payload. Bit-exact.
pub const MODE_BLOCK_DATA: u8 = 0x36;
/// Identifier query (VIN/serial/BCC/MEC/OS/HW/CAL). Not given bit-exact in the spec; assigned
/// here to avoid colliding with `MODE_COMMAND`'s start-of-write submodes.
pub const MODE_ID_REQUEST: u8 = 0x3D;
/// Security access (seed/key), following the ISO 14230 "SecurityAccess" service id convention.
pub const MODE_SECURITY: u8 = 0x27;

pub mod id_submode {
    pub const VIN1: u8 = 0x01;
    pub const VIN2: u8 = 0x02;
    pub const VIN3: u8 = 0x03;
    pub const SERIAL1: u8 = 0x04;
    pub const SERIAL2: u8 = 0x05;
    pub const SERIAL3: u8 = 0x06;
    pub const BCC: u8 = 0x07;
    pub const MEC: u8 = 0x08;
    pub const OS_ID: u8 = 0x09;
    pub const HW_ID: u8 = 0x0A;
    pub const CAL_ID: u8 = 0x0B;
}

pub mod security_submode {
    pub const SEED_REQUEST: u8 = 0x01;
    pub const UNLOCK_REQUEST: u8 = 0x02;
}

pub mod command_submode {
    pub const START_FULL_FLASH: u8 = 0x01;
    pub const START_CALIBRATION: u8 = 0x02;
    pub const EXIT_KERNEL: u8 = 0x03;
    pub const SUPPRESS_CHATTER: u8 = 0x04;
    pub const DEVICE_PRESENT: u8 = 0x05;
    pub const HIGH_SPEED_CHECK: u8 = 0x06;
    pub const HIGH_SPEED_OK: u8 = 0x07;
    pub const BEGIN_HIGH_SPEED: u8 = 0x08;
}

/// Marker byte (frame index 4) distinguishing a literal bulk-read payload span from a
/// run-length-encoded one. Bit-exact per §4.6.7 and the §8 literal scenario.
pub const READ_MARKER_LITERAL: u8 = 0x01;
pub const READ_MARKER_RLE: u8 = 0x02;
