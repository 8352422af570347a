//! mavg-core: records, traits and a single-run executor for the moving-average pipeline.
//!
//! The pipeline is a straight line:
//! - a `Source` decodes events and hands them to its `Context`
//! - one `Operator` (the sliding-window aggregator) turns each event into zero or more points
//! - a `Sink` persists the points
//!
//! Quick example:
//! ```no_run
//! use mavg_core::{AveragedPoint, Context, Event, Operator, Result, Sink, Source};
//! # #[tokio::main]
//! # async fn main() -> mavg_core::Result<()> {
//! struct OneEvent;
//! #[async_trait::async_trait]
//! impl Source for OneEvent {
//!     async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
//!         ctx.collect(Event::new(chrono::Utc::now(), 20)).await
//!     }
//! }
//!
//! struct Echo;
//! impl Operator for Echo {
//!     fn on_event(&mut self, ev: &Event) -> Vec<AveragedPoint> {
//!         vec![AveragedPoint::new(ev.timestamp, ev.duration as f64)]
//!     }
//! }
//!
//! struct Discard;
//! #[async_trait::async_trait]
//! impl Sink for Discard {
//!     async fn store(&mut self, _point: &AveragedPoint) -> Result<()> { Ok(()) }
//! }
//!
//! let mut exec = mavg_core::Executor::new();
//! exec.source(OneEvent).operator(Echo).sink(Discard);
//! exec.run().await?;
//! # Ok(()) }
//! ```

use std::time::Instant;

use tracing::{debug, warn};

pub mod config;
pub mod metrics;
pub mod record;

pub use config::{InputSource, PipelineConfig};
pub use record::{decode_record, timefmt, AveragedPoint, Event, TranslationDelivered};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to decode event from {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write output: {0}")]
    Sink(#[source] std::io::Error),
    #[error("queue error: {0}")]
    Queue(String),
    #[error("no events provided")]
    EmptyInput,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle a source pushes decoded events into.
///
/// `collect` returns once the event has been aggregated and its points stored, so a
/// source may acknowledge its input only after a successful return.
#[async_trait::async_trait]
pub trait Context: Send {
    async fn collect(&mut self, event: Event) -> Result<()>;
}

#[async_trait::async_trait]
pub trait Source: Send {
    async fn run(&mut self, ctx: &mut dyn Context) -> Result<()>;
}

/// Stateful event-to-points transform. Infallible: all error surfaces belong to sources and sinks.
pub trait Operator: Send {
    fn on_event(&mut self, event: &Event) -> Vec<AveragedPoint>;
}

#[async_trait::async_trait]
pub trait Sink: Send {
    async fn store(&mut self, point: &AveragedPoint) -> Result<()>;

    async fn store_all(&mut self, points: &[AveragedPoint]) -> Result<()> {
        for p in points {
            self.store(p).await?;
        }
        Ok(())
    }

    /// Release the underlying resource. Called exactly once per run.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Counters reported by `Executor::run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub events: u64,
    pub points: u64,
}

pub struct Executor {
    source: Option<Box<dyn Source>>,
    operator: Option<Box<dyn Operator>>,
    sink: Option<Box<dyn Sink>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            source: None,
            operator: None,
            sink: None,
        }
    }

    pub fn source<S: Source + 'static>(&mut self, s: S) -> &mut Self {
        self.source = Some(Box::new(s));
        self
    }

    pub fn operator<O: Operator + 'static>(&mut self, o: O) -> &mut Self {
        self.operator = Some(Box::new(o));
        self
    }

    pub fn sink<K: Sink + 'static>(&mut self, s: K) -> &mut Self {
        self.sink = Some(Box::new(s));
        self
    }

    /// Drive the source to completion on the current task, then close the sink.
    ///
    /// The sink is closed even when the source fails; the source error wins over a close error.
    pub async fn run(&mut self) -> Result<RunStats> {
        struct ExecCtx<'a> {
            operator: &'a mut dyn Operator,
            sink: &'a mut dyn Sink,
            stats: RunStats,
        }

        #[async_trait::async_trait]
        impl<'a> Context for ExecCtx<'a> {
            async fn collect(&mut self, event: Event) -> Result<()> {
                let points = self.operator.on_event(&event);
                self.stats.events += 1;
                if points.is_empty() {
                    return Ok(());
                }
                let started = Instant::now();
                self.sink.store_all(&points).await?;
                metrics::SINK_STORE_LATENCY_MS.observe(started.elapsed().as_secs_f64() * 1_000.0);
                self.stats.points += points.len() as u64;
                Ok(())
            }
        }

        let mut source = self
            .source
            .take()
            .ok_or_else(|| Error::Config("no source configured".into()))?;
        let mut operator = self
            .operator
            .take()
            .ok_or_else(|| Error::Config("no operator configured".into()))?;
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| Error::Config("no sink configured".into()))?;

        let mut ctx = ExecCtx {
            operator: operator.as_mut(),
            sink: sink.as_mut(),
            stats: RunStats::default(),
        };
        let outcome = source.run(&mut ctx).await;
        let stats = ctx.stats;

        let closed = sink.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "error while closing sink");
        }
        debug!(events = stats.events, points = stats.points, "run finished");
        outcome?;
        closed?;
        Ok(stats)
    }
}

pub mod prelude {
    pub use super::{
        AveragedPoint, Context, Error, Event, Executor, Operator, Result, RunStats, Sink, Source,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    struct VecSource {
        events: Vec<Event>,
        fail_after: Option<usize>,
    }

    #[async_trait::async_trait]
    impl Source for VecSource {
        async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
            for (i, ev) in self.events.drain(..).enumerate() {
                if self.fail_after == Some(i) {
                    return Err(Error::Queue("boom".into()));
                }
                ctx.collect(ev).await?;
            }
            Ok(())
        }
    }

    // Emits one point per event, plus nothing for zero-duration events.
    struct Echo;
    impl Operator for Echo {
        fn on_event(&mut self, ev: &Event) -> Vec<AveragedPoint> {
            if ev.duration == 0 {
                return Vec::new();
            }
            vec![AveragedPoint::new(ev.timestamp, ev.duration as f64)]
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        points: Arc<Mutex<Vec<AveragedPoint>>>,
        closes: Arc<Mutex<usize>>,
    }

    #[async_trait::async_trait]
    impl Sink for Recorder {
        async fn store(&mut self, point: &AveragedPoint) -> Result<()> {
            self.points.lock().unwrap().push(*point);
            Ok(())
        }
        async fn close(&mut self) -> Result<()> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct BrokenSink {
        closes: Arc<Mutex<usize>>,
    }

    #[async_trait::async_trait]
    impl Sink for BrokenSink {
        async fn store(&mut self, _point: &AveragedPoint) -> Result<()> {
            Err(Error::Sink(std::io::Error::other("disk full")))
        }
        async fn close(&mut self) -> Result<()> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn ev(min: u32, d: u64) -> Event {
        Event::new(Utc.with_ymd_and_hms(2018, 12, 26, 18, min, 0).unwrap(), d)
    }

    #[tokio::test]
    async fn run_pipes_events_and_closes_sink_once() {
        let rec = Recorder::default();
        let mut exec = Executor::new();
        exec.source(VecSource { events: vec![ev(1, 5), ev(2, 0), ev(3, 7)], fail_after: None })
            .operator(Echo)
            .sink(rec.clone());
        let stats = exec.run().await.unwrap();
        assert_eq!(stats, RunStats { events: 3, points: 2 });
        assert_eq!(rec.points.lock().unwrap().len(), 2);
        assert_eq!(*rec.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn sink_is_closed_when_source_fails() {
        let rec = Recorder::default();
        let mut exec = Executor::new();
        exec.source(VecSource { events: vec![ev(1, 5), ev(2, 6)], fail_after: Some(1) })
            .operator(Echo)
            .sink(rec.clone());
        let err = exec.run().await.unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
        assert_eq!(rec.points.lock().unwrap().len(), 1);
        assert_eq!(*rec.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn sink_failure_aborts_run_and_still_closes_once() {
        let sink = BrokenSink::default();
        let mut exec = Executor::new();
        exec.source(VecSource { events: vec![ev(1, 5), ev(2, 6)], fail_after: None })
            .operator(Echo)
            .sink(sink.clone());
        let err = exec.run().await.unwrap_err();
        assert!(matches!(err, Error::Sink(_)), "unexpected error {err:?}");
        assert_eq!(*sink.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_parts_are_configuration_errors() {
        let mut exec = Executor::new();
        exec.operator(Echo).sink(Recorder::default());
        assert!(matches!(exec.run().await, Err(Error::Config(_))));
    }
}
