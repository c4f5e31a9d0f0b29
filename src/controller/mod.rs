//! Controller endpoints and the line protocol.
//!
//! A controller is any pair of byte streams speaking the tab-separated line
//! protocol: stdin/stdout, an accepted socket connection, or the parent end
//! of a service's control socketpair. This module owns the stream pumps,
//! the fixed-capacity line assembly, the lossy outbound queue with its
//! overflow resync, the statedump cursor, and the command dispatcher.

mod commands;
mod dump;
mod endpoint;
mod stream;

pub use dump::DumpCursor;
pub use endpoint::{Assembled, CtlId, CtlMsg, Endpoint, LineAssembler};
pub(crate) use commands::dispatch;
