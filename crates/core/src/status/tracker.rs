//! Status change tracking.
//!
//! Every write of an order or item status passes through
//! [`StatusChangeTracker::before_save`], which stamps `status_changed_on`
//! when the status differs from the value observed when the entity was
//! loaded, or when the entity has never been stamped.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::Status;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that advances by a fixed step every time it is read.
#[derive(Debug)]
pub struct SteppingClock {
    next_millis: AtomicI64,
    step_millis: i64,
}

impl SteppingClock {
    /// Create a clock starting at `start` and advancing by `step` per read.
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next_millis: AtomicI64::new(start.timestamp_millis()),
            step_millis: step.num_milliseconds(),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.next_millis.fetch_add(self.step_millis, Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Mutable view over the status bookkeeping of an entity.
pub struct TrackedFields<'a> {
    pub status: Status,
    pub status_changed_on: &'a mut Option<DateTime<Utc>>,
    pub observed_status: &'a mut Option<Status>,
}

/// An entity whose status changes are tracked.
pub trait Tracked {
    /// Identity used in logs.
    fn tracked_id(&self) -> &str;

    /// Borrow the status bookkeeping fields.
    fn tracked_fields(&mut self) -> TrackedFields<'_>;
}

/// Interceptor invoked on load and before every save of a tracked entity.
#[derive(Clone)]
pub struct StatusChangeTracker {
    clock: Arc<dyn Clock>,
}

impl Default for StatusChangeTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for StatusChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusChangeTracker").finish_non_exhaustive()
    }
}

impl StatusChangeTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current time according to the tracker's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Remember the status an entity had when it was loaded.
    pub fn observe<T: Tracked>(&self, entity: &mut T) {
        let fields = entity.tracked_fields();
        *fields.observed_status = Some(fields.status);
    }

    /// Status observed when the entity was loaded, if any.
    pub fn prior_status<T: Tracked>(&self, entity: &mut T) -> Option<Status> {
        *entity.tracked_fields().observed_status
    }

    /// Stamp `status_changed_on` if the status changed since it was observed.
    ///
    /// Returns true when the timestamp was updated. After this call the
    /// current status becomes the observed one, so a second save without a
    /// status change leaves the timestamp alone.
    pub fn before_save<T: Tracked>(&self, entity: &mut T) -> bool {
        let id = entity.tracked_id().to_string();
        let fields = entity.tracked_fields();
        let changed = fields.status_changed_on.is_none()
            || *fields.observed_status != Some(fields.status);

        if changed {
            let now = self.clock.now();
            tracing::trace!(
                "Status of {} is {} (was {:?}), stamping {}",
                id,
                fields.status,
                fields.observed_status,
                now
            );
            *fields.status_changed_on = Some(now);
        }
        *fields.observed_status = Some(fields.status);
        changed
    }
}
