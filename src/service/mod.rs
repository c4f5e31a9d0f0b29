//! Services: the per-child record, its packed variable buffer, the indexed
//! table, and the fork/exec plumbing.
//!
//! A service is an identity with policy and state, independent of whether a
//! process is currently running for it. The state machine itself is driven
//! by the supervisor's tick; this module owns the data and the transitions'
//! building blocks.

mod record;
mod spawn;
mod table;
mod vars;

pub use record::{Service, SvcState, TriggerSpec};
pub use spawn::{NixSpawner, SpawnPlan, Spawner, EXIT_INVALID_ENVIRONMENT};
pub use table::ServiceTable;
pub use vars::VarBuf;
