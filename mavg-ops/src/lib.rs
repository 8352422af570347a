//! mavg-ops: per-minute bucketing and the sliding-window moving average.
//!
//! - `time::Bucket`: the minute slot an event is attributed to
//! - `window::SlidingWindow`: ring-buffer engine with `ingest` / `ingest_all` / `compute_all`
//! - `MovingAverage`: the engine wrapped as a pipeline `Operator`

use std::num::NonZeroUsize;

use mavg_core::{metrics, AveragedPoint, Event, Operator};
use tracing::{instrument, warn};

pub mod time;
pub mod window;
pub use time::Bucket;
pub use window::{compute_all, BucketState, SlidingWindow};

/// Moving-average operator.
///
/// Example
/// ```no_run
/// use std::num::NonZeroUsize;
/// use mavg_ops::MovingAverage;
/// let op = MovingAverage::new(NonZeroUsize::new(10).unwrap());
/// # let _ = op;
/// ```
pub struct MovingAverage {
    window: SlidingWindow,
}

impl MovingAverage {
    pub fn new(window_size: NonZeroUsize) -> Self {
        Self {
            window: SlidingWindow::new(window_size),
        }
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }
}

impl Operator for MovingAverage {
    #[instrument(name = "moving_average_on_event", skip_all, fields(ts = %event.timestamp))]
    fn on_event(&mut self, event: &Event) -> Vec<AveragedPoint> {
        let points = self.window.ingest(event);
        if points.is_empty() {
            metrics::LATE_EVENTS.inc();
            warn!(
                timestamp = %event.timestamp,
                head = ?self.window.head().map(|b| b.start()),
                "event landed in an already emitted bucket; ignored"
            );
        } else {
            metrics::EVENTS_INGESTED.inc();
            metrics::POINTS_EMITTED.inc_by(points.len() as u64);
        }
        metrics::WINDOW_BUCKETS.set(self.window.len() as i64);
        points
    }
}

pub mod prelude {
    pub use super::{compute_all, Bucket, BucketState, MovingAverage, SlidingWindow};
}
