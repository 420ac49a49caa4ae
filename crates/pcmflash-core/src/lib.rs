//! Suspending transaction and session orchestration layer for the VPW PCM reflashing tool
//! (C5-C8, C11). Everything `async` in the system lives here; frame construction/parsing stays
//! in `pcmflash-protocol`.

pub mod collaborators;
pub mod device;
pub mod mathexpr;
pub mod session;
pub mod transaction;

pub use collaborators::{
    AtomicCancellationToken, CancellationSignal, ExecutableRelativeFileSource, FileSource,
    FileSourceError, Logger, NeverCancelled, NullLogger, TracingLogger,
};
pub use device::{mock, Device};
pub use mathexpr::{compile as compile_expr, Expr, MathExprError, Vars};
pub use session::{PcmSession, DEFAULT_READ_BLOCK_SIZE};
pub use transaction::{send_request, RETRY_DELAY};
