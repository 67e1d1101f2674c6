//! Frame pacing and per-client session lifecycle for the display
//! protocol: batches dirty-surface drains into paced frames and carries
//! one client from handshake through steady state to shutdown.

pub mod pacer;
pub mod session;
mod wire;

pub use pacer::{ClientWriter, FramePacer, ModifiedFlag, PacerConfig};
pub use session::{ClientSession, ConnectParams, RdpInputSink};
