//! End-to-end literal scenarios driving a [`PcmSession`] against a scripted [`MockDevice`].

use std::sync::Arc;

use pcmflash_core::device::mock::{MockDevice, SharedMockDevice};
use pcmflash_core::{ExecutableRelativeFileSource, NeverCancelled, NullLogger, PcmSession};
use pcmflash_protocol::key::ALGORITHM_PASSTHROUGH;
use pcmflash_protocol::{BlockId, Message, PcmInfo, Response, VpwSpeed};

fn test_info() -> PcmInfo {
    PcmInfo {
        image_base_address: 0,
        image_size: 0x600,
        kernel_base_address: 0xFF_9150,
        key_algorithm_id: ALGORITHM_PASSTHROUGH,
    }
}

fn new_session(device: impl pcmflash_core::Device + 'static) -> PcmSession {
    PcmSession::new(
        Box::new(device),
        test_info(),
        Arc::new(NullLogger),
        Arc::new(ExecutableRelativeFileSource),
        Arc::new(NeverCancelled),
    )
}

#[tokio::test]
async fn vin_query_reconstructs_the_vin_from_three_blocks() {
    let mut device = MockDevice::new(64, false);
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x3D, 0x01, b'1', b'G', b'1', b'Y', b'Y']));
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x3D, 0x02, b'2', b'2', b'G', b'9', b'6']));
    device.push_response(Message::new(vec![
        0x6C, 0xF0, 0x10, 0x3D, 0x03, b'5', b'1', b'0', b'0', b'0', b'0', b'1',
    ]));
    let mut session = new_session(device);

    let vin = session.query_vin().await;
    assert_eq!(vin, Response::success("1G1YY22G965100001".to_string()));
}

async fn unlock_via_passthrough_seed_zero(session: &mut PcmSession) {
    // `device_present_notification` is a fire-and-forget keep-alive: no response is queued for
    // it, so the very first queued response below must answer the seed request.
    let result = session.unlock().await;
    assert_eq!(result, Response::success(true));
    assert!(session.is_unlocked());
}

#[tokio::test]
async fn unlock_with_zero_seed_skips_the_unlock_frame() {
    let mut device = MockDevice::new(64, false);
    device.push_timeout(); // the keep-alive send_request still waits for a (never-arriving) reply
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x27, 0x01, 0x00, 0x00]));
    let mut session = new_session(device);

    unlock_via_passthrough_seed_zero(&mut session).await;
}

#[tokio::test]
async fn write_block_matches_the_literal_ack_scenario() {
    let mut device = MockDevice::new(64, false);
    device.push_timeout();
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x27, 0x01, 0x00, 0x00]));
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x7B, 0x04]));
    let mut session = new_session(device);

    unlock_via_passthrough_seed_zero(&mut session).await;
    let result = session.write_block(BlockId::Serial, b"012345").await;
    assert_eq!(result, Response::success(true));
}

#[tokio::test]
async fn write_block_surfaces_a_rejection_distinctly_from_a_timeout() {
    let mut device = MockDevice::new(64, false);
    device.push_timeout();
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x27, 0x01, 0x00, 0x00]));
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x7B, 0x03]));
    let mut session = new_session(device);

    unlock_via_passthrough_seed_zero(&mut session).await;
    let result = session.write_block(BlockId::Serial, b"012345").await;
    assert!(matches!(result, Response::Refused(_)));
}

fn decode_block_message_offset(msg: &Message) -> (u32, bool) {
    let bytes = msg.bytes();
    let address = ((bytes[4] as u32) << 16) | ((bytes[7] as u32) << 8) | (bytes[8] as u32);
    (address, bytes[9] != 0)
}

#[tokio::test]
async fn kernel_upload_of_400_bytes_with_64_byte_chunks_matches_the_literal_offsets() {
    let shared = SharedMockDevice::new(MockDevice::new(76, false));
    let mut session = new_session(shared.clone());

    // One ack for the upload-permission request, then one per chunk (7 chunks for 400 bytes /
    // 64-byte chunks: 6 full chunks plus a 16-byte remainder).
    for _ in 0..8 {
        shared.lock().push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x34, 0x00]));
    }

    let payload = vec![0xAAu8; 400];
    let result = session.pcm_execute(&payload, 0).await;
    assert_eq!(result, Response::success(true));
    assert!(session.is_kernel_running());

    let offsets: Vec<(u32, bool)> = shared
        .lock()
        .sent_frames()
        .iter()
        .filter(|m| m.mode() == Some(pcmflash_protocol::wire::MODE_BLOCK_DATA))
        .map(decode_block_message_offset)
        .collect();

    assert_eq!(
        offsets,
        vec![
            (384, false),
            (320, false),
            (256, false),
            (192, false),
            (128, false),
            (64, false),
            (0, true),
        ]
    );
}

#[tokio::test]
async fn negotiate_high_speed_matches_the_prefixed_pcm_ack_and_switches_the_bus() {
    let mut device = MockDevice::new(64, true);
    // `negotiate_high_speed` compares by prefix, not full equality — the PCM's real ack frame
    // carries trailing bytes this exchange doesn't pin down (§4.6.5).
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x3C, 0x07, 0x99]));
    let mut session = new_session(device);

    let ok = session.negotiate_high_speed().await;
    assert!(ok);
    assert_eq!(session.bus_speed(), VpwSpeed::FourX);
}

#[tokio::test]
async fn negotiate_high_speed_refuses_when_the_pcm_ack_does_not_match() {
    let mut device = MockDevice::new(64, true);
    device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x3C, 0x00]));
    let mut session = new_session(device);

    let ok = session.negotiate_high_speed().await;
    assert!(!ok);
    assert_eq!(session.bus_speed(), VpwSpeed::OneX);
}

#[tokio::test]
async fn negotiate_high_speed_is_a_no_op_when_the_device_lacks_4x_support() {
    let device = MockDevice::new(64, false);
    let mut session = new_session(device);

    let ok = session.negotiate_high_speed().await;
    assert!(ok);
    assert_eq!(session.bus_speed(), VpwSpeed::OneX);
}

#[tokio::test]
async fn read_failure_runs_exit_kernel_twice_and_forces_1x() {
    let shared = SharedMockDevice::new(MockDevice::new(220, false));
    let mut session = new_session(shared.clone());

    // Unlock via the zero-seed shortcut, then bring up a (trivial) kernel so `kernel_running`
    // is true going into the read.
    shared.lock().push_timeout();
    shared.lock().push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x27, 0x01, 0x00, 0x00]));
    unlock_via_passthrough_seed_zero(&mut session).await;

    // One ack for the upload-permission request, one for the single (remainder) chunk that
    // carries this 1-byte payload.
    shared.lock().push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x34, 0x00]));
    shared.lock().push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x34, 0x00]));
    let kernel_result = session.pcm_execute(&[0x90], 0xFF_9150).await;
    assert_eq!(kernel_result, Response::success(true));
    assert!(session.is_kernel_running());

    // Every subsequent receive times out, so the very first read block exhausts its retries.
    for _ in 0..10 {
        shared.lock().push_timeout();
    }

    let result = session.read_contents().await;
    assert!(matches!(result, Response::Error(_)));
    assert!(!session.is_kernel_running());

    let guard = shared.lock();
    assert_eq!(guard.exit_kernel_send_count(), 2);
    assert_eq!(guard.current_speed(), VpwSpeed::OneX);
}
