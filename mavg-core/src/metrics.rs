use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static EVENTS_INGESTED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("mavg_events_ingested_total", "Events folded into the sliding window")
        .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static POINTS_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "mavg_points_emitted_total",
        "Averaged points emitted, one per minute bucket",
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static LATE_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "mavg_late_events_total",
        "Events whose bucket was already finalized when they arrived",
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static DECODE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("mavg_decode_failures_total", "Records that could not be decoded into events"),
        &["source"],
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static QUEUE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("mavg_queue_errors_total", "Queue transport failures"),
        &["op"],
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static EMPTY_POLLS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("mavg_queue_empty_polls_total", "Queue polls that returned no messages")
        .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static BYTES_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("mavg_bytes_written_total", "Total bytes written by sink"),
        &["sink"],
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(c.clone())).expect("metric registered once");
    c
});

pub static WINDOW_BUCKETS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("mavg_window_buckets", "Minute buckets currently held by the window")
        .expect("valid metric");
    REGISTRY.register(Box::new(g.clone())).expect("metric registered once");
    g
});

pub static SINK_STORE_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(
        HistogramOpts::new(
            "mavg_sink_store_latency_ms",
            "Sink store latency per ingested event (ms)",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
    )
    .expect("valid metric");
    REGISTRY.register(Box::new(h.clone())).expect("metric registered once");
    h
});

pub fn render_prometheus() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer).ok();
    String::from_utf8(buffer).unwrap_or_default()
}
