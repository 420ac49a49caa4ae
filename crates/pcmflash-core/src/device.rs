//! The abstract half-duplex device channel (C5, §6.1). This crate never assumes a particular
//! transport — `pcmflash-device-serial` is the one concrete implementation shipped alongside it,
//! and [`mock::MockDevice`] stands in for hardware in tests and `--mock` CLI runs.

use std::time::Duration;

use async_trait::async_trait;
use pcmflash_protocol::{DeviceTimeout, Message, VpwSpeed};

/// A half-duplex, byte-oriented channel to the scantool. Exclusively owned by one
/// [`crate::session::PcmSession`] at a time (§3, §5).
#[async_trait]
pub trait Device: Send {
    /// Opens/resets the underlying transport. Returns `false` on failure.
    async fn initialize(&mut self) -> bool;

    /// Sends one frame. Returns `false` on a transport-level send failure.
    async fn send_frame(&mut self, msg: &Message) -> bool;

    /// Waits up to `timeout` for the next frame. `None` on timeout.
    async fn receive_frame(&mut self, timeout: Duration) -> Option<Message>;

    /// Switches the bus speed. Implementations that can't switch speed treat `FourX` as a
    /// no-op and continue reporting `supports_4x() == false`.
    async fn set_speed(&mut self, speed: VpwSpeed);

    /// Discards any buffered/queued frames (bus chatter) without interpreting them.
    async fn clear_queue(&mut self);

    /// Sets the receive timeout scenario for subsequent `receive_frame` calls.
    fn set_timeout(&mut self, scenario: DeviceTimeout);

    fn supports_4x(&self) -> bool;

    /// Largest frame, in bytes, this device can send in one call (header + payload + checksum).
    fn max_send_size(&self) -> usize;

    /// Releases the underlying transport. Called exactly once, by the owning session.
    async fn dispose(&mut self);
}

pub mod mock {
    //! An in-memory [`Device`] that plays back a scripted sequence of responses. Used by this
    //! crate's own tests and by the CLI's `--mock` dry-run mode.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use pcmflash_protocol::{DeviceTimeout, Message, VpwSpeed};

    use super::Device;

    /// One call recorded by [`MockDevice`] for assertions in tests (e.g. "exactly two
    /// `exit_kernel` sends" — §8).
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Recorded {
        Sent(Message),
        SpeedChange(VpwSpeedRecord),
        QueueCleared,
        Disposed,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum VpwSpeedRecord {
        OneX,
        FourX,
    }

    pub struct MockDevice {
        responses: VecDeque<Option<Message>>,
        sent: Vec<Message>,
        history: Vec<Recorded>,
        max_send_size: usize,
        supports_4x: bool,
        speed: VpwSpeed,
        send_should_fail: VecDeque<bool>,
    }

    impl MockDevice {
        pub fn new(max_send_size: usize, supports_4x: bool) -> Self {
            MockDevice {
                responses: VecDeque::new(),
                sent: Vec::new(),
                history: Vec::new(),
                max_send_size,
                supports_4x,
                speed: VpwSpeed::OneX,
                send_should_fail: VecDeque::new(),
            }
        }

        /// Queues a frame to hand back from the next `receive_frame` call.
        pub fn push_response(&mut self, msg: Message) {
            self.responses.push_back(Some(msg));
        }

        /// Queues a timeout (no frame) for the next `receive_frame` call.
        pub fn push_timeout(&mut self) {
            self.responses.push_back(None);
        }

        /// Makes the next `send_frame` call fail, regardless of queued responses.
        pub fn fail_next_send(&mut self) {
            self.send_should_fail.push_back(true);
        }

        pub fn sent_frames(&self) -> &[Message] {
            &self.sent
        }

        pub fn history(&self) -> &[Recorded] {
            &self.history
        }

        pub fn current_speed(&self) -> VpwSpeed {
            self.speed
        }

        pub fn exit_kernel_send_count(&self) -> usize {
            self.sent
                .iter()
                .filter(|m| {
                    m.mode() == Some(pcmflash_protocol::wire::MODE_COMMAND)
                        && m.payload().first() == Some(&pcmflash_protocol::wire::command_submode::EXIT_KERNEL)
                })
                .count()
        }
    }

    impl MockDevice {
        // Synchronous cores, reused by both `impl Device for MockDevice` and
        // `SharedMockDevice` below — nothing here ever suspends, so a lock can wrap a call
        // without ever holding the guard across an `.await`.
        fn do_send(&mut self, msg: &Message) -> bool {
            if self.send_should_fail.pop_front().unwrap_or(false) {
                return false;
            }
            self.sent.push(msg.clone());
            self.history.push(Recorded::Sent(msg.clone()));
            true
        }

        fn do_receive(&mut self) -> Option<Message> {
            self.responses.pop_front().flatten()
        }

        fn do_set_speed(&mut self, speed: VpwSpeed) {
            self.speed = speed;
            self.history.push(Recorded::SpeedChange(match speed {
                VpwSpeed::OneX => VpwSpeedRecord::OneX,
                VpwSpeed::FourX => VpwSpeedRecord::FourX,
            }));
        }

        fn do_clear_queue(&mut self) {
            self.history.push(Recorded::QueueCleared);
        }

        fn do_dispose(&mut self) {
            self.history.push(Recorded::Disposed);
        }
    }

    #[async_trait]
    impl Device for MockDevice {
        async fn initialize(&mut self) -> bool {
            true
        }

        async fn send_frame(&mut self, msg: &Message) -> bool {
            self.do_send(msg)
        }

        async fn receive_frame(&mut self, _timeout: Duration) -> Option<Message> {
            self.do_receive()
        }

        async fn set_speed(&mut self, speed: VpwSpeed) {
            self.do_set_speed(speed)
        }

        async fn clear_queue(&mut self) {
            self.do_clear_queue()
        }

        fn set_timeout(&mut self, _scenario: DeviceTimeout) {}

        fn supports_4x(&self) -> bool {
            self.supports_4x
        }

        fn max_send_size(&self) -> usize {
            self.max_send_size
        }

        async fn dispose(&mut self) {
            self.do_dispose()
        }
    }

    /// A [`MockDevice`] shared behind an `Arc<Mutex<_>>`, so a test can hand one half to a
    /// [`crate::session::PcmSession`] (which takes ownership of its `Device`) while keeping the
    /// other half to inspect what was sent after the session is done with it.
    #[derive(Clone)]
    pub struct SharedMockDevice(Arc<Mutex<MockDevice>>);

    impl SharedMockDevice {
        pub fn new(device: MockDevice) -> Self {
            SharedMockDevice(Arc::new(Mutex::new(device)))
        }

        pub fn lock(&self) -> std::sync::MutexGuard<'_, MockDevice> {
            self.0.lock().expect("mock device mutex poisoned")
        }
    }

    #[async_trait]
    impl Device for SharedMockDevice {
        async fn initialize(&mut self) -> bool {
            true
        }

        async fn send_frame(&mut self, msg: &Message) -> bool {
            self.lock().do_send(msg)
        }

        async fn receive_frame(&mut self, _timeout: Duration) -> Option<Message> {
            self.lock().do_receive()
        }

        async fn set_speed(&mut self, speed: VpwSpeed) {
            self.lock().do_set_speed(speed)
        }

        async fn clear_queue(&mut self) {
            self.lock().do_clear_queue()
        }

        fn set_timeout(&mut self, _scenario: DeviceTimeout) {}

        fn supports_4x(&self) -> bool {
            self.lock().supports_4x
        }

        fn max_send_size(&self) -> usize {
            self.lock().max_send_size
        }

        async fn dispose(&mut self) {
            self.lock().do_dispose()
        }
    }
}
