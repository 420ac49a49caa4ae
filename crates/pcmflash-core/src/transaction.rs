//! Bounded-effort request/response plumbing over a [`Device`] (C6, §4.5). This layer never
//! interprets a frame — it only sends, waits, retries, and filters bus chatter.

use std::time::Duration;

use pcmflash_protocol::{wire, DeviceTimeout, Message};

use crate::device::Device;

/// Delay between retry attempts (§4.5 step 3).
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Receive timeout used while waiting for a single request's response.
fn receive_timeout(scenario: DeviceTimeout) -> Duration {
    match scenario {
        DeviceTimeout::Read => Duration::from_millis(3000),
        DeviceTimeout::Write => Duration::from_millis(1000),
        DeviceTimeout::Maximum => Duration::from_secs(3600),
    }
}

/// `true` for bus chatter the transaction layer discards without counting it as a response —
/// the broadcast "tool present" keep-alive and any other device-present notification PCMs echo
/// onto the bus independent of what this tool is waiting for.
fn is_chatter(msg: &Message) -> bool {
    msg.mode() == Some(wire::MODE_COMMAND)
        && msg.payload().first() == Some(&wire::command_submode::DEVICE_PRESENT)
}

/// Sends `msg` and waits for a response, retrying up to `retries` times with [`RETRY_DELAY`]
/// between attempts. Chatter frames are discarded and do not consume a retry attempt on their
/// own — the same receive window keeps waiting for a real response.
pub async fn send_request(
    device: &mut dyn Device,
    msg: &Message,
    retries: u32,
    timeout_scenario: DeviceTimeout,
) -> Option<Message> {
    let timeout = receive_timeout(timeout_scenario);
    for attempt in 0..retries {
        if !device.send_frame(msg).await {
            if attempt + 1 < retries {
                tokio::time::sleep(RETRY_DELAY).await;
            }
            continue;
        }

        loop {
            match device.receive_frame(timeout).await {
                Some(frame) if is_chatter(&frame) => continue,
                Some(frame) => return Some(frame),
                None => break,
            }
        }

        if attempt + 1 < retries {
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDevice;
    use pcmflash_protocol::MessageFactory;

    #[tokio::test]
    async fn retries_until_a_response_arrives() {
        let mut device = MockDevice::new(64, false);
        device.push_timeout();
        device.push_timeout();
        device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x27, 0x01, 0x12, 0x34]));

        let request = MessageFactory::seed_request();
        let response = send_request(&mut device, &request, 5, DeviceTimeout::Read).await;
        assert!(response.is_some());
        assert_eq!(device.sent_frames().len(), 3);
    }

    #[tokio::test]
    async fn exhausting_retries_yields_none() {
        let mut device = MockDevice::new(64, false);
        for _ in 0..5 {
            device.push_timeout();
        }
        let request = MessageFactory::seed_request();
        let response = send_request(&mut device, &request, 5, DeviceTimeout::Read).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn chatter_frames_are_skipped_without_counting_as_the_response() {
        let mut device = MockDevice::new(64, false);
        device.push_response(MessageFactory::device_present_notification());
        device.push_response(Message::new(vec![0x6C, 0xF0, 0x10, 0x27, 0x01, 0x00, 0x00]));

        let request = MessageFactory::seed_request();
        let response = send_request(&mut device, &request, 5, DeviceTimeout::Read).await;
        assert_eq!(response, Some(Message::new(vec![0x6C, 0xF0, 0x10, 0x27, 0x01, 0x00, 0x00])));
        assert_eq!(device.sent_frames().len(), 1);
    }
}
