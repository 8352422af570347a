use std::num::NonZeroUsize;

use mavg_core::{AveragedPoint, Error, Event, Result};

use crate::time::{before_or_equal, Bucket};

/// Contribution of the events attributed to one bucket, or of the whole window.
///
/// `duration_sum` is 128-bit so that any run of `u64` durations fits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketState {
    pub count: u64,
    pub duration_sum: u128,
}

impl BucketState {
    fn fold(&mut self, duration: u64) {
        self.count += 1;
        self.duration_sum += u128::from(duration);
    }

    fn add(&mut self, other: BucketState) {
        self.count += other.count;
        self.duration_sum += other.duration_sum;
    }

    fn sub(&mut self, other: BucketState) {
        self.count -= other.count;
        self.duration_sum -= other.duration_sum;
    }

    /// Mean duration, or 0 for an empty state.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.duration_sum as f64 / self.count as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    start: Bucket,
    head: Bucket,
    tail: Bucket,
}

/// Per-minute moving average over the last `window_size` buckets.
///
/// Buckets live in a ring of at most `window_size` slots; a bucket's slot is its
/// minute offset from the first bucket modulo `window_size`. The running total is
/// kept incrementally so each tick is O(1) whatever the window size.
///
/// Not thread-safe: drive it from a single owner.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window_size: NonZeroUsize,
    slots: Vec<BucketState>,
    live: usize,
    total: BucketState,
    cursor: Option<Cursor>,
}

impl SlidingWindow {
    pub fn new(window_size: NonZeroUsize) -> Self {
        Self {
            window_size,
            slots: Vec::new(),
            live: 0,
            total: BucketState::default(),
            cursor: None,
        }
    }

    pub fn window_size(&self) -> NonZeroUsize {
        self.window_size
    }

    /// Buckets currently inside the window. Never exceeds `window_size`.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// True once the first event has been seen.
    pub fn is_running(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn running_total(&self) -> BucketState {
        self.total
    }

    /// The next bucket to be emitted, once running.
    pub fn head(&self) -> Option<Bucket> {
        self.cursor.map(|c| c.head)
    }

    /// Advance the clock up to and including the event's bucket, emitting one point per minute.
    ///
    /// The first event opens the series one minute before its own bucket. An event whose
    /// bucket was already emitted yields no points and is not counted.
    pub fn ingest(&mut self, event: &Event) -> Vec<AveragedPoint> {
        let target = Bucket::of(event.timestamp);
        let mut cursor = *self.cursor.get_or_insert_with(|| {
            let start = target.prev();
            Cursor { start, head: start, tail: start }
        });

        let mut out = Vec::new();
        while before_or_equal(cursor.head, target) {
            // The head reuses the tail's slot once the ring is full.
            if self.live == self.window_size.get() {
                self.evict_tail(&mut cursor);
            }
            let mut state = BucketState::default();
            if cursor.head == target {
                state.fold(event.duration);
                self.total.add(state);
            }
            self.open(&cursor, state);

            out.push(AveragedPoint::new(cursor.head.start(), self.total.average()));
            cursor.head = cursor.head.next();
        }
        self.cursor = Some(cursor);
        out
    }

    /// Ingest events in order, concatenating the emitted points.
    pub fn ingest_all<'a, I>(&mut self, events: I) -> Vec<AveragedPoint>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut out = Vec::new();
        for ev in events {
            out.extend(self.ingest(ev));
        }
        out
    }

    fn slot_of(&self, cursor: &Cursor, bucket: Bucket) -> usize {
        let offset = bucket.minutes_since(cursor.start).max(0) as usize;
        offset % self.window_size.get()
    }

    fn open(&mut self, cursor: &Cursor, state: BucketState) {
        let slot = self.slot_of(cursor, cursor.head);
        // Slots are first visited in order, so the ring only grows at its end.
        if slot == self.slots.len() {
            self.slots.push(state);
        } else {
            self.slots[slot] = state;
        }
        self.live += 1;
    }

    fn evict_tail(&mut self, cursor: &mut Cursor) {
        let slot = self.slot_of(cursor, cursor.tail);
        let old = std::mem::take(&mut self.slots[slot]);
        self.total.sub(old);
        self.live -= 1;
        cursor.tail = cursor.tail.next();
    }
}

/// Batch entry point: the full series for an ordered, non-empty list of events.
///
/// Covers from the minute before the first event's bucket up to the last event's bucket,
/// exactly like feeding the events one by one to a fresh `SlidingWindow`.
pub fn compute_all(window_size: NonZeroUsize, events: &[Event]) -> Result<Vec<AveragedPoint>> {
    if events.is_empty() {
        return Err(Error::EmptyInput);
    }
    Ok(SlidingWindow::new(window_size).ingest_all(events))
}
