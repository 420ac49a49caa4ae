//! The PCM session (C7) — the orchestration core described in §4.6 and §4.7.

use std::path::Path;
use std::sync::Arc;

use pcmflash_protocol::{
    plan_upload_chunks, BlockId, CalibrationRange, DeviceTimeout, MessageFactory, MessageParser,
    PcmInfo, ReadPayload, Response, VpwSpeed, WriteTarget,
};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::collaborators::{CancellationSignal, FileSource, Logger};
use crate::device::Device;
use crate::transaction::send_request;

/// Default bulk-read block size: large enough to amortize per-request overhead, small enough
/// to fit comfortably in one VPW frame (§4.6.7).
pub const DEFAULT_READ_BLOCK_SIZE: usize = 200;
const UNLOCK_RETRIES: u32 = 5;
const UPLOAD_RETRIES: u32 = 5;
const READ_BLOCK_RETRIES: u32 = 5;
const WRITE_START_RETRIES: u32 = 5;

/// High-level PCM session. Owns its [`Device`] exclusively; see [`PcmSession::shutdown`] and the
/// `Drop` impl for the recovery guarantee described in §4.7 and §9.
pub struct PcmSession {
    device: Option<Box<dyn Device>>,
    info: PcmInfo,
    logger: Arc<dyn Logger>,
    file_source: Arc<dyn FileSource>,
    cancellation: Arc<dyn CancellationSignal>,
    bus_speed: VpwSpeed,
    unlocked: bool,
    kernel_running: bool,
    shutdown_done: bool,
}

impl PcmSession {
    pub fn new(
        device: Box<dyn Device>,
        info: PcmInfo,
        logger: Arc<dyn Logger>,
        file_source: Arc<dyn FileSource>,
        cancellation: Arc<dyn CancellationSignal>,
    ) -> Self {
        PcmSession {
            device: Some(device),
            info,
            logger,
            file_source,
            cancellation,
            bus_speed: VpwSpeed::OneX,
            unlocked: false,
            kernel_running: false,
            shutdown_done: false,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn is_kernel_running(&self) -> bool {
        self.kernel_running
    }

    pub fn bus_speed(&self) -> VpwSpeed {
        self.bus_speed
    }

    fn device_mut(&mut self) -> &mut dyn Device {
        self.device.as_deref_mut().expect("device used after shutdown")
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    // ---- §4.6.1 identifier queries -------------------------------------------------------

    pub async fn query_vin(&mut self) -> Response<String> {
        self.query_triplet(
            |i| MessageFactory::vin_request_i(i),
            MessageParser::parse_vin_responses,
            "VIN",
        )
        .await
    }

    pub async fn query_serial(&mut self) -> Response<String> {
        self.query_triplet(
            |i| MessageFactory::serial_request_i(i),
            MessageParser::parse_serial_responses,
            "serial number",
        )
        .await
    }

    async fn query_triplet(
        &mut self,
        request_i: impl Fn(u8) -> pcmflash_protocol::Message,
        parse: impl Fn(
            &pcmflash_protocol::Message,
            &pcmflash_protocol::Message,
            &pcmflash_protocol::Message,
        ) -> Response<String>,
        what: &str,
    ) -> Response<String> {
        let mut frames = Vec::with_capacity(3);
        for i in 1..=3u8 {
            let request = request_i(i);
            match send_request(self.device_mut(), &request, 1, DeviceTimeout::Read).await {
                Some(frame) => frames.push(frame),
                None => return Response::timeout(format!("{what}: no response to block {i}")),
            }
        }
        parse(&frames[0], &frames[1], &frames[2])
    }

    pub async fn query_bcc(&mut self) -> Response<String> {
        self.single_query(MessageFactory::bcc_request(), MessageParser::parse_bcc_response, "BCC")
            .await
    }

    pub async fn query_mec(&mut self) -> Response<String> {
        self.single_query(MessageFactory::mec_request(), MessageParser::parse_mec_response, "MEC")
            .await
    }

    async fn single_query(
        &mut self,
        request: pcmflash_protocol::Message,
        parse: impl Fn(&pcmflash_protocol::Message) -> Response<String>,
        what: &str,
    ) -> Response<String> {
        match send_request(self.device_mut(), &request, 1, DeviceTimeout::Read).await {
            Some(frame) => parse(&frame),
            None => Response::timeout(format!("{what}: no response")),
        }
    }

    pub async fn query_os_id(&mut self) -> Response<u32> {
        self.single_id_query(MessageFactory::os_id_request(), "OS id").await
    }

    pub async fn query_hw_id(&mut self) -> Response<u32> {
        self.single_id_query(MessageFactory::hw_id_request(), "hardware id").await
    }

    pub async fn query_cal_id(&mut self) -> Response<u32> {
        self.single_id_query(MessageFactory::cal_id_request(), "calibration id").await
    }

    async fn single_id_query(&mut self, request: pcmflash_protocol::Message, what: &str) -> Response<u32> {
        match send_request(self.device_mut(), &request, 1, DeviceTimeout::Read).await {
            Some(frame) => MessageParser::parse_block_u32(&frame),
            None => Response::timeout(format!("{what}: no response")),
        }
    }

    // ---- §4.6.3 write_block / §4.6.2 VIN write --------------------------------------------

    /// Writes one 6-byte logical block. Requires `unlocked` (§3 invariant 1).
    pub async fn write_block(&mut self, block_id: BlockId, data: &[u8]) -> Response<bool> {
        if !self.unlocked {
            return Response::error("write_block requires the PCM to be unlocked");
        }
        let msg = match MessageFactory::write_block(block_id, data) {
            Ok(msg) => msg,
            Err(e) => return Response::error(e.to_string()),
        };
        match send_request(self.device_mut(), &msg, 1, DeviceTimeout::Write).await {
            Some(frame) => MessageParser::parse_write_ack(&frame, block_id),
            None => Response::timeout(format!("write_block({block_id:?}): no acknowledgement")),
        }
    }

    pub async fn write_vin(&mut self, vin: &str) -> Response<bool> {
        if !self.unlocked {
            return Response::error("write_vin requires the PCM to be unlocked");
        }
        if vin.len() != 17 {
            return Response::error(format!("VIN must be 17 characters, got {}", vin.len()));
        }
        let bytes = vin.as_bytes();

        let mut block1 = vec![0x00u8];
        block1.extend_from_slice(&bytes[0..5]);
        for (block_id, data) in [
            (BlockId::Vin1, block1),
            (BlockId::Vin2, bytes[5..11].to_vec()),
            (BlockId::Vin3, bytes[11..17].to_vec()),
        ] {
            match self.write_block(block_id, &data).await {
                Response::Success(true) => {}
                Response::Success(false) => return Response::error(format!("{block_id:?} write was not acknowledged")),
                other => return other,
            }
        }
        Response::success(true)
    }

    // ---- §4.6.4 unlock ----------------------------------------------------------------------

    pub async fn unlock(&mut self) -> Response<bool> {
        let keepalive = MessageFactory::device_present_notification();
        let _ = send_request(self.device_mut(), &keepalive, 1, DeviceTimeout::Write).await;

        let seed_request = MessageFactory::seed_request();
        let frame = match send_request(self.device_mut(), &seed_request, UNLOCK_RETRIES, DeviceTimeout::Read).await {
            Some(frame) => frame,
            None => return Response::timeout("unlock: no response to seed request"),
        };

        if MessageParser::is_unlocked(&frame) {
            self.unlocked = true;
            return Response::success(true);
        }

        let seed = match MessageParser::parse_seed(&frame) {
            Response::Success(seed) => seed,
            other => return other.recast(),
        };

        if seed == 0x0000 {
            self.unlocked = true;
            return Response::success(true);
        }

        let key = match pcmflash_protocol::key(self.info.key_algorithm_id, seed) {
            Ok(key) => key,
            Err(e) => return Response::error(format!("unlock: {e}")),
        };
        let unlock_request = MessageFactory::unlock_request(key);
        let frame = match send_request(self.device_mut(), &unlock_request, UNLOCK_RETRIES, DeviceTimeout::Read).await {
            Some(frame) => frame,
            None => return Response::timeout("unlock: no response to unlock request"),
        };

        let (result, diagnostic) = MessageParser::parse_unlock_response(&frame);
        if let Some(diagnostic) = &diagnostic {
            self.logger.debug(diagnostic);
        }
        if result.is_success() {
            self.unlocked = true;
        }
        result
    }

    // ---- §4.6.5 4x negotiation ----------------------------------------------------------------

    /// Returns `true` iff the bus ends up at 4x (either because the PCM agreed, or because the
    /// device never supported 4x to begin with — that's not a failure, just a no-op).
    pub async fn negotiate_high_speed(&mut self) -> bool {
        if !self.device_mut().supports_4x() {
            return true;
        }

        let check = MessageFactory::high_speed_check();
        let response = match send_request(self.device_mut(), &check, 1, DeviceTimeout::Read).await {
            Some(frame) => frame,
            None => return false,
        };

        let ok_prefix = MessageFactory::high_speed_ok_response();
        if !response.starts_with(ok_prefix.bytes()) {
            return false;
        }

        let begin = MessageFactory::begin_high_speed();
        if !self.device_mut().send_frame(&begin).await {
            return false;
        }
        self.device_mut().set_speed(VpwSpeed::FourX).await;
        self.bus_speed = VpwSpeed::FourX;
        true
    }

    // ---- §4.6.6 kernel upload and execute ------------------------------------------------------

    async fn suppress_chatter(&mut self) {
        let msg = MessageFactory::disable_normal_message_transmission();
        let _ = self.device_mut().send_frame(&msg).await;
    }

    /// Uploads `payload` to PCM RAM at `base_address` and transfers control to it as the final
    /// step. Preconditions: `kernel_running == false` (§3 invariant 2).
    pub async fn pcm_execute(&mut self, payload: &[u8], base_address: u32) -> Response<bool> {
        if self.kernel_running {
            return Response::error("pcm_execute called while a kernel is already running");
        }
        if self.is_cancelled() {
            return Response::Cancelled;
        }

        self.suppress_chatter().await;

        let upload_request = match MessageFactory::upload_request(payload.len() as u32, base_address) {
            Ok(msg) => msg,
            Err(e) => return Response::error(format!("pcm_execute: {e}")),
        };
        if send_request(self.device_mut(), &upload_request, UPLOAD_RETRIES, DeviceTimeout::Write)
            .await
            .is_none()
        {
            return Response::error("pcm_execute: PCM did not acknowledge the upload request");
        }

        let chunk_size = self.device_mut().max_send_size().saturating_sub(12);
        if chunk_size == 0 {
            return Response::error("pcm_execute: device max_send_size too small for any chunk");
        }
        let plan = plan_upload_chunks(payload.len(), chunk_size);
        let total = payload.len();
        let mut sent = 0usize;

        for chunk in plan {
            if self.is_cancelled() {
                return Response::Cancelled;
            }
            let data = &payload[chunk.offset..chunk.offset + chunk.length];
            let address = base_address + chunk.offset as u32;
            let msg = MessageFactory::block_message(data, address, chunk.execute_on_receive);

            if send_request(self.device_mut(), &msg, UPLOAD_RETRIES, DeviceTimeout::Write)
                .await
                .is_none()
            {
                return Response::error(format!(
                    "pcm_execute: chunk at offset {:#X} was not acknowledged",
                    chunk.offset
                ));
            }
            self.suppress_chatter().await;

            sent += chunk.length;
            let percent = (sent * 100) / total;
            self.logger.user(&format!("kernel upload: {percent}%"));

            if chunk.execute_on_receive {
                self.kernel_running = true;
            }
        }

        Response::success(true)
    }

    // ---- §4.6.7 bulk read -----------------------------------------------------------------------

    /// Reads the full flash image described by `self.info`. Requires `unlocked` and
    /// `kernel_running` (with the read kernel already in place).
    pub async fn read_contents(&mut self) -> Response<Vec<u8>> {
        if !self.unlocked || !self.kernel_running {
            return Response::error("read_contents requires an unlocked PCM with the read kernel running");
        }

        let base = self.info.image_base_address;
        let end = self.info.image_end_address();
        let mut image = vec![0u8; self.info.image_size as usize];
        let mut addr = base;

        while addr < end {
            if self.is_cancelled() {
                self.exit_kernel_and_recover().await;
                return Response::Cancelled;
            }

            let block_size = std::cmp::min(DEFAULT_READ_BLOCK_SIZE as u32, end - addr) as usize;
            self.suppress_chatter().await;

            match self.try_read_block(&mut image, addr, block_size).await {
                Response::Success(()) => {
                    addr += block_size as u32;
                    let percent = ((addr - base) as u64 * 100 / self.info.image_size.max(1) as u64) as u32;
                    self.logger.user(&format!("read: {percent}%"));
                }
                other => {
                    self.exit_kernel_and_recover().await;
                    return other.recast();
                }
            }
        }

        Response::success(image)
    }

    async fn try_read_block(&mut self, image: &mut [u8], addr: u32, len: usize) -> Response<()> {
        for _ in 0..READ_BLOCK_RETRIES {
            let request = MessageFactory::read_request(addr, len as u16);
            let ack = match send_request(self.device_mut(), &request, 1, DeviceTimeout::Read).await {
                Some(frame) => frame,
                None => continue,
            };
            match MessageParser::parse_read_response(&ack) {
                Response::Success(true) => {}
                _ => continue,
            }

            let payload_frame = match self.device_mut().receive_frame(std::time::Duration::from_millis(3000)).await {
                Some(frame) => frame,
                None => continue,
            };

            match MessageParser::parse_read_payload(&payload_frame, len) {
                Response::Success(ReadPayload::Literal(bytes)) => {
                    let base = (addr - self.info.image_base_address) as usize;
                    image[base..base + len].copy_from_slice(&bytes);
                    return Response::success(());
                }
                Response::Success(ReadPayload::RunLength { run, fill }) => {
                    let base = (addr - self.info.image_base_address) as usize;
                    image[base..base + run].fill(fill);
                    return Response::success(());
                }
                _ => continue,
            }
        }
        Response::error(format!("read block at {addr:#08X} failed after {READ_BLOCK_RETRIES} attempts"))
    }

    // ---- §4.6.10 exit-kernel recovery -----------------------------------------------------------

    /// Best-effort cleanup: forces the kernel to exit and the bus back to 1x, ignoring every
    /// send/receive failure along the way (§4.6.7, §4.6.10, §4.7).
    pub async fn exit_kernel_and_recover(&mut self) {
        let exit = MessageFactory::exit_kernel();
        if let Some(device) = self.device.as_deref_mut() {
            let _ = device.send_frame(&exit).await;
            device.set_speed(VpwSpeed::OneX).await;
            let _ = device.send_frame(&exit).await;
        }
        self.kernel_running = false;
        self.bus_speed = VpwSpeed::OneX;
    }

    // ---- §4.6.9 validated send helper -----------------------------------------------------------

    /// Sends `msg`, retrying up to `max_attempts` times, and accepts only once `validator`
    /// reports success on a received frame.
    async fn send_and_validate(
        &mut self,
        msg: &pcmflash_protocol::Message,
        validator: impl Fn(&pcmflash_protocol::Message) -> Response<bool>,
        failure_text: &str,
        timeout_scenario: DeviceTimeout,
    ) -> Response<bool> {
        for _ in 0..WRITE_START_RETRIES {
            let frame = match send_request(self.device_mut(), msg, 1, timeout_scenario).await {
                Some(frame) => frame,
                None => continue,
            };
            match validator(&frame) {
                Response::Success(true) => return Response::success(true),
                Response::Success(false) => return Response::refused(failure_text.to_string()),
                _ => continue,
            }
        }
        Response::error(failure_text.to_string())
    }

    // ---- §4.6.8 full / calibration flash write ---------------------------------------------------

    /// Loads and executes the write kernel (if one isn't already running), then streams `stream`
    /// into the PCM as 192-byte chunks per `target`.
    pub async fn write(
        &mut self,
        target: WriteTarget,
        kernel_path: &Path,
        stream: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Response<()> {
        if !self.kernel_running {
            if self.is_cancelled() {
                return Response::Cancelled;
            }
            let kernel = match self.file_source.read_all(kernel_path).await {
                Response::Success(bytes) => bytes,
                other => return other.recast(),
            };
            match self.pcm_execute(&kernel, self.info.kernel_base_address).await {
                Response::Success(true) => {}
                other => return other.recast(),
            }
        }

        self.device_mut().set_timeout(DeviceTimeout::Maximum);

        let start_ok = match target {
            WriteTarget::Full => {
                let msg = MessageFactory::start_full_flash_request();
                self.send_and_validate(&msg, MessageParser::parse_start_full_flash_response, "PCM refused to start full flash write", DeviceTimeout::Maximum)
                    .await
            }
            WriteTarget::Calibration(range) => {
                if !range.fits_within(&self.info) {
                    return Response::error("calibration range does not fit within the PCM's image geometry");
                }
                let msg = match MessageFactory::start_calibration_write_request(range) {
                    Ok(msg) => msg,
                    Err(e) => return Response::error(e.to_string()),
                };
                self.send_and_validate(&msg, MessageParser::parse_start_calibration_response, "PCM refused to start calibration write", DeviceTimeout::Maximum)
                    .await
            }
        };
        if !start_ok.is_success() {
            return start_ok.recast();
        }

        let mut buf = vec![0u8; pcmflash_protocol::FLASH_CHUNK_SIZE];
        loop {
            if self.is_cancelled() {
                return Response::Cancelled;
            }
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Response::error(format!("reading flash image stream: {e}")),
            };
            let msg = MessageFactory::write_block_frame(&buf[..n]);
            match self
                .send_and_validate(&msg, |frame| Response::success(frame.mode() == Some(pcmflash_protocol::wire::MODE_WRITE_ACK)), "PCM rejected a flash write chunk", DeviceTimeout::Maximum)
                .await
            {
                Response::Success(true) => {}
                other => return other.map(|_| ()),
            }
        }

        Response::success(())
    }

    /// Cleanly shuts down the session: runs the recovery sequence if the kernel is still
    /// running, then disposes the device. After this call, `Drop` does nothing further.
    pub async fn shutdown(&mut self) {
        if self.shutdown_done {
            return;
        }
        if self.kernel_running {
            self.exit_kernel_and_recover().await;
        }
        if let Some(mut device) = self.device.take() {
            device.dispose().await;
        }
        self.shutdown_done = true;
    }
}

impl Drop for PcmSession {
    fn drop(&mut self) {
        if self.shutdown_done {
            return;
        }
        let Some(device) = self.device.take() else {
            return;
        };
        let needs_recovery = self.kernel_running;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut device = device;
                    if needs_recovery {
                        let exit = MessageFactory::exit_kernel();
                        let _ = device.send_frame(&exit).await;
                        device.set_speed(VpwSpeed::OneX).await;
                        let _ = device.send_frame(&exit).await;
                    }
                    device.dispose().await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    "PcmSession dropped outside a tokio runtime; exit-kernel recovery could not run"
                );
            }
        }
    }
}
