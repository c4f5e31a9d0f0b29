//! The statedump cursor.
//!
//! A dump enumerates named fds, then services, then nonempty signal
//! buckets, and finishes with `statedump\tcomplete`. The cursor advances
//! one entry per main-loop turn so other events interleave freely; because
//! delivery is asynchronous and lossy, a state variable may legitimately
//! appear more than once during a dump, and events that fire while the
//! cursor runs may land before or after `complete`.

use crate::clock::Ts;

/// Where an in-progress statedump will resume.
///
/// Resumption is by key, not by position: `after` names the last entry
/// emitted, and the next turn takes whatever is now the first entry past
/// it. Entries created or deleted mid-dump are picked up or skipped
/// naturally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DumpCursor {
    Fds { after: Option<String> },
    Services { after: Option<String> },
    Signals { after: Ts },
}

impl DumpCursor {
    pub fn start() -> DumpCursor {
        DumpCursor::Fds { after: None }
    }
}
