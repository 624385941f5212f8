//! Status model shared by orders and order items.

mod locks;
mod tracker;
mod types;

pub use locks::{EntityKind, EntityLocks};
pub use tracker::{Clock, StatusChangeTracker, SteppingClock, SystemClock, Tracked, TrackedFields};
pub use types::{Status, StatusError};
