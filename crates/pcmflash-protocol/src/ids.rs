//! Bus addresses, block identifiers, and the small value types the session hands around.

/// Tool (scantool) bus address.
pub const TOOL_ADDR: u8 = 0xF0;
/// PCM bus address.
pub const PCM_ADDR: u8 = 0x10;
/// VPW broadcast address.
pub const BROADCAST_ADDR: u8 = 0xFE;

/// Priority byte used by single-frame control/query traffic.
pub const PRIORITY_CONTROL: u8 = 0x6C;
/// Priority byte used by block-data (kernel/flash chunk) traffic.
pub const PRIORITY_BLOCK: u8 = 0x6D;

/// Writable logical blocks. Each carries a fixed 6-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockId {
    Vin1,
    Vin2,
    Vin3,
    Serial,
    Bcc,
    Mec,
}

impl BlockId {
    /// Wire value sent/expected in the write and ack frames.
    pub const fn wire_value(self) -> u8 {
        match self {
            BlockId::Vin1 => 0x01,
            BlockId::Vin2 => 0x02,
            BlockId::Vin3 => 0x03,
            BlockId::Serial => 0x04,
            BlockId::Bcc => 0x05,
            BlockId::Mec => 0x06,
        }
    }

    /// Fixed payload length for this block. Always 6 for the blocks this tool writes.
    pub const fn payload_len(self) -> usize {
        6
    }
}

/// VPW bus speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpwSpeed {
    OneX,
    FourX,
}

/// Receive-timeout scenarios a `Device` is asked to honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTimeout {
    Read,
    Write,
    Maximum,
}

/// Descriptor of the target PCM: image geometry, kernel load address, and unlock algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmInfo {
    pub image_base_address: u32,
    pub image_size: u32,
    pub kernel_base_address: u32,
    pub key_algorithm_id: u16,
}

impl PcmInfo {
    pub const fn image_end_address(&self) -> u32 {
        self.image_base_address + self.image_size
    }
}

/// Address range for a partial ("calibration-only") flash write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationRange {
    pub start_address: u32,
    pub end_address: u32,
}

impl CalibrationRange {
    /// `true` when the range is non-empty and ordered (`start < end`).
    pub const fn is_well_formed(&self) -> bool {
        self.start_address < self.end_address
    }

    pub const fn fits_within(&self, info: &PcmInfo) -> bool {
        self.is_well_formed() && self.end_address <= info.image_end_address()
    }
}

/// What a full/calibration flash write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Full,
    Calibration(CalibrationRange),
}
