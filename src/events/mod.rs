//! Protocol events: the data model and its stable wire rendering.
//!
//! Everything a controller observes is an [`Event`]. Events are produced by
//! the supervisor while it mutates its tables, rendered once with
//! [`Event::to_line`], and pushed synchronously onto every endpoint's
//! bounded queue. Delivery is lossy by design; the shapes are not.

mod event;

pub use event::{Event, FdDetail, ServicePhase, WaitRepr};
