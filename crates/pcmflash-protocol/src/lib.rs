//! Frame, factory, parser and seed/key primitives for the GM-style VPW (J1850) PCM reflashing
//! protocol. Everything in this crate is synchronous and side-effect-free (§4.1-§4.4); the
//! suspending transaction/session layer that drives it lives in `pcmflash-core`.

pub mod chunking;
pub mod error;
pub mod factory;
pub mod ids;
pub mod key;
pub mod message;
pub mod parser;
pub mod response;
pub mod wire;

pub use chunking::{plan_upload_chunks, ChunkPlan};
pub use error::FactoryError;
pub use factory::{MessageFactory, FLASH_CHUNK_SIZE};
pub use ids::{
    BlockId, CalibrationRange, DeviceTimeout, PcmInfo, VpwSpeed, WriteTarget, BROADCAST_ADDR,
    PCM_ADDR, TOOL_ADDR,
};
pub use key::{key, KeyAlgorithmError};
pub use message::{append_block_sum, calc_block_sum, strip_block_sum, Message};
pub use parser::{MessageParser, ReadPayload};
pub use response::Response;
