//! Pure constructors for every outbound request frame (§4.2).
//!
//! Every function here returns a fully-formed, ready-to-send [`Message`]; none of them touch a
//! device or suspend. Validation failures (wrong block length, empty payload, malformed range)
//! are reported as [`FactoryError`], not as panics.

use crate::error::FactoryError;
use crate::ids::{BlockId, CalibrationRange, BROADCAST_ADDR, PCM_ADDR, PRIORITY_BLOCK, PRIORITY_CONTROL, TOOL_ADDR};
use crate::message::{append_block_sum, calc_block_sum, Message};
use crate::wire::{command_submode, id_submode, security_submode, MODE_BLOCK_DATA, MODE_COMMAND,
    MODE_ID_REQUEST, MODE_READ_REQUEST, MODE_SECURITY, MODE_UPLOAD_REQUEST, MODE_WRITE_BLOCK};

/// Fixed trailer the write-kernel's chunk framing uses in place of a per-chunk address — the
/// PCM kernel tracks the running offset internally (§4.6.8).
const FULL_WRITE_CHUNK_TAG: [u8; 3] = [0xFF, 0xA0, 0x00];
/// Payload size of one full/calibration write chunk.
pub const FLASH_CHUNK_SIZE: usize = 192;

/// Stateless namespace for the outbound-frame constructors.
pub struct MessageFactory;

impl MessageFactory {
    fn control_frame(mode: u8, payload: &[u8]) -> Message {
        let mut bytes = vec![PRIORITY_CONTROL, PCM_ADDR, TOOL_ADDR, mode];
        bytes.extend_from_slice(payload);
        Message::new(bytes)
    }

    fn id_request(submode: u8) -> Message {
        Self::control_frame(MODE_ID_REQUEST, &[submode])
    }

    pub fn vin_request_i(i: u8) -> Message {
        let submode = match i {
            1 => id_submode::VIN1,
            2 => id_submode::VIN2,
            3 => id_submode::VIN3,
            other => panic!("vin_request_i: block index must be 1..=3, got {other}"),
        };
        Self::id_request(submode)
    }

    pub fn serial_request_i(i: u8) -> Message {
        let submode = match i {
            1 => id_submode::SERIAL1,
            2 => id_submode::SERIAL2,
            3 => id_submode::SERIAL3,
            other => panic!("serial_request_i: block index must be 1..=3, got {other}"),
        };
        Self::id_request(submode)
    }

    pub fn bcc_request() -> Message {
        Self::id_request(id_submode::BCC)
    }

    pub fn mec_request() -> Message {
        Self::id_request(id_submode::MEC)
    }

    pub fn os_id_request() -> Message {
        Self::id_request(id_submode::OS_ID)
    }

    pub fn hw_id_request() -> Message {
        Self::id_request(id_submode::HW_ID)
    }

    pub fn cal_id_request() -> Message {
        Self::id_request(id_submode::CAL_ID)
    }

    pub fn seed_request() -> Message {
        Self::control_frame(MODE_SECURITY, &[security_submode::SEED_REQUEST])
    }

    pub fn unlock_request(key: u16) -> Message {
        Self::control_frame(
            MODE_SECURITY,
            &[security_submode::UNLOCK_REQUEST, (key >> 8) as u8, (key & 0xFF) as u8],
        )
    }

    /// Asks permission to upload `size` bytes to `address` (a 24-bit PCM RAM address). A
    /// zero-byte upload is never valid (§8 boundary scenario 1: "no upload, no request
    /// permitted") and is rejected here rather than sent to the PCM.
    pub fn upload_request(size: u32, address: u32) -> Result<Message, FactoryError> {
        if size == 0 {
            return Err(FactoryError::EmptyPayload);
        }
        let payload = [
            ((address >> 16) & 0xFF) as u8,
            ((address >> 8) & 0xFF) as u8,
            (address & 0xFF) as u8,
            ((size >> 8) & 0xFF) as u8,
            (size & 0xFF) as u8,
        ];
        Ok(Self::control_frame(MODE_UPLOAD_REQUEST, &payload))
    }

    /// Builds one kernel-upload chunk. `execute_on_receive` asks the PCM to jump to
    /// `dest_address` as soon as this chunk lands (§4.6.6).
    ///
    /// Header layout (10 bytes, this crate's own design — see [`crate::wire`]):
    /// `priority, dst, src, mode(0x36), addr_hi, len_hi, len_lo, addr_mid, addr_lo, exec_flag`.
    pub fn block_message(
        payload: &[u8],
        dest_address: u32,
        execute_on_receive: bool,
    ) -> Message {
        let len = payload.len() as u16;
        let mut bytes = vec![
            PRIORITY_BLOCK,
            PCM_ADDR,
            TOOL_ADDR,
            MODE_BLOCK_DATA,
            ((dest_address >> 16) & 0xFF) as u8,
            (len >> 8) as u8,
            (len & 0xFF) as u8,
            ((dest_address >> 8) & 0xFF) as u8,
            (dest_address & 0xFF) as u8,
            u8::from(execute_on_receive),
        ];
        bytes.extend_from_slice(payload);
        let sum = calc_block_sum(&bytes_with_room_for_sum(&bytes));
        bytes.push((sum >> 8) as u8);
        bytes.push((sum & 0xFF) as u8);
        Message::new(bytes)
    }

    pub fn read_request(address: u32, length: u16) -> Message {
        let payload = [
            ((address >> 16) & 0xFF) as u8,
            ((address >> 8) & 0xFF) as u8,
            (address & 0xFF) as u8,
            (length >> 8) as u8,
            (length & 0xFF) as u8,
        ];
        Self::control_frame(MODE_READ_REQUEST, &payload)
    }

    pub fn high_speed_check() -> Message {
        Self::control_frame(MODE_COMMAND, &[command_submode::HIGH_SPEED_CHECK])
    }

    /// The ack a PCM sends back for [`Self::high_speed_check`] — PCM→tool addressed, unlike
    /// every other frame this factory builds (which are tool→PCM outbound requests), because
    /// this constant exists only to be compared as a prefix against an inbound reply
    /// (`negotiate_high_speed`), never to be sent itself.
    pub fn high_speed_ok_response() -> Message {
        let bytes = vec![PRIORITY_CONTROL, TOOL_ADDR, PCM_ADDR, MODE_COMMAND, command_submode::HIGH_SPEED_OK];
        Message::new(bytes)
    }

    pub fn begin_high_speed() -> Message {
        let mut bytes = vec![PRIORITY_CONTROL, BROADCAST_ADDR, TOOL_ADDR, MODE_COMMAND];
        bytes.push(command_submode::BEGIN_HIGH_SPEED);
        Message::new(bytes)
    }

    pub fn disable_normal_message_transmission() -> Message {
        let mut bytes = vec![PRIORITY_CONTROL, BROADCAST_ADDR, TOOL_ADDR, MODE_COMMAND];
        bytes.push(command_submode::SUPPRESS_CHATTER);
        Message::new(bytes)
    }

    pub fn device_present_notification() -> Message {
        let mut bytes = vec![PRIORITY_CONTROL, BROADCAST_ADDR, TOOL_ADDR, MODE_COMMAND];
        bytes.push(command_submode::DEVICE_PRESENT);
        Message::new(bytes)
    }

    pub fn exit_kernel() -> Message {
        Self::control_frame(MODE_COMMAND, &[command_submode::EXIT_KERNEL])
    }

    pub fn start_full_flash_request() -> Message {
        Self::control_frame(MODE_COMMAND, &[command_submode::START_FULL_FLASH])
    }

    pub fn start_calibration_write_request(range: CalibrationRange) -> Result<Message, FactoryError> {
        if !range.is_well_formed() {
            return Err(FactoryError::MalformedRange {
                start: range.start_address,
                end: range.end_address,
            });
        }
        let payload = [
            command_submode::START_CALIBRATION,
            ((range.start_address >> 16) & 0xFF) as u8,
            ((range.start_address >> 8) & 0xFF) as u8,
            (range.start_address & 0xFF) as u8,
            ((range.end_address >> 16) & 0xFF) as u8,
            ((range.end_address >> 8) & 0xFF) as u8,
            (range.end_address & 0xFF) as u8,
        ];
        Ok(Self::control_frame(MODE_COMMAND, &payload))
    }

    /// Builds a 192-byte full/calibration write chunk and stamps it with the block checksum via
    /// [`append_block_sum`] (§4.6.8's bit-exact framing matches that helper's auto-detected
    /// shape). `data` may be shorter than [`FLASH_CHUNK_SIZE`] for the final chunk of a stream.
    pub fn write_block_frame(data: &[u8]) -> Message {
        let len = data.len() as u16;
        let mut bytes = vec![
            PRIORITY_BLOCK,
            PCM_ADDR,
            TOOL_ADDR,
            MODE_BLOCK_DATA,
            0x00,
            (len >> 8) as u8,
            (len & 0xFF) as u8,
        ];
        bytes.extend_from_slice(&FULL_WRITE_CHUNK_TAG);
        bytes.extend_from_slice(data);
        bytes.extend([0, 0]);
        Message::new(append_block_sum(&bytes))
    }

    /// Writes one 6-byte logical block (VIN/serial/BCC/MEC): `6C <PCM> <Tool> 3B <block_id>
    /// <data...>` (§4.6.3, bit-exact per the §8 literal scenario).
    pub fn write_block(block_id: BlockId, data: &[u8]) -> Result<Message, FactoryError> {
        if data.len() != block_id.payload_len() {
            return Err(FactoryError::WrongBlockLength {
                expected: block_id.payload_len(),
                actual: data.len(),
            });
        }
        let mut bytes = vec![PRIORITY_CONTROL, PCM_ADDR, TOOL_ADDR, MODE_WRITE_BLOCK, block_id.wire_value()];
        bytes.extend_from_slice(data);
        Ok(Message::new(bytes))
    }
}

/// `calc_block_sum` expects the trailing two bytes to already be present (even if zero) so the
/// sum span `[4..len-2]` lands correctly; this pads a temporary copy for that purpose.
fn bytes_with_room_for_sum(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.extend([0, 0]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::calc_block_sum;

    #[test]
    fn write_block_matches_literal_scenario() {
        let msg = MessageFactory::write_block(BlockId::Serial, b"012345").unwrap();
        assert_eq!(
            msg.bytes(),
            &[0x6C, 0x10, 0xF0, 0x3B, 0x04, b'0', b'1', b'2', b'3', b'4', b'5']
        );
    }

    #[test]
    fn write_block_rejects_wrong_length() {
        let err = MessageFactory::write_block(BlockId::Vin1, b"short").unwrap_err();
        assert_eq!(err, FactoryError::WrongBlockLength { expected: 6, actual: 5 });
    }

    #[test]
    fn block_message_checksum_matches_invariant() {
        let msg = MessageFactory::block_message(&[1, 2, 3, 4], 0xFF_9150, true);
        let bytes = msg.bytes();
        let sum = calc_block_sum(bytes);
        let hi = bytes[bytes.len() - 2];
        let lo = bytes[bytes.len() - 1];
        assert_eq!(sum, u16::from_be_bytes([hi, lo]));
    }

    #[test]
    fn start_full_flash_matches_literal_scenario() {
        let msg = MessageFactory::start_full_flash_request();
        assert_eq!(msg.bytes(), &[0x6C, 0x10, 0xF0, 0x3C, 0x01]);
    }

    #[test]
    fn write_block_frame_matches_literal_header() {
        let data = vec![0x42u8; FLASH_CHUNK_SIZE];
        let msg = MessageFactory::write_block_frame(&data);
        let bytes = msg.bytes();
        assert_eq!(&bytes[0..10], &[0x6D, 0x10, 0xF0, 0x36, 0x00, 0x00, 192, 0xFF, 0xA0, 0x00]);
        assert_eq!(bytes.len(), 10 + FLASH_CHUNK_SIZE + 2);
        let sum = calc_block_sum(bytes);
        assert_eq!(sum, u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]));
    }

    #[test]
    fn upload_request_rejects_empty_payload() {
        let err = MessageFactory::upload_request(0, 0xFF_9150).unwrap_err();
        assert_eq!(err, FactoryError::EmptyPayload);
    }

    #[test]
    fn calibration_request_rejects_malformed_range() {
        let range = CalibrationRange { start_address: 0x2000, end_address: 0x1000 };
        let err = MessageFactory::start_calibration_write_request(range).unwrap_err();
        assert_eq!(err, FactoryError::MalformedRange { start: 0x2000, end: 0x1000 });
    }
}
