use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref LINES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_lines_total",
        "Total lines read from the serial device"
    ))
    .unwrap();
    pub static ref RECORDS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_records_total",
        "Total records decoded successfully"
    ))
    .unwrap();
    pub static ref DECODE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_decode_failures_total",
        "Total lines rejected by the decoder"
    ))
    .unwrap();
    pub static ref PERSIST_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_persist_failures_total",
        "Total failed appends to the CSV log"
    ))
    .unwrap();
    pub static ref BROADCASTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_broadcasts_total",
        "Total records fanned out to subscribers"
    ))
    .unwrap();
    pub static ref SEND_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_send_failures_total",
        "Total subscribers dropped after a failed send"
    ))
    .unwrap();
    pub static ref SEND_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_send_dropped_total",
        "Total records skipped for subscribers with a full queue"
    ))
    .unwrap();
    pub static ref SUBSCRIBERS: Gauge = Gauge::with_opts(Opts::new(
        "bridge_subscribers",
        "Currently connected subscribers"
    ))
    .unwrap();
    pub static ref PORT_RETRIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "bridge_port_retries_total",
        "Total waits before retrying port selection"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(LINES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECORDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DECODE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PERSIST_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BROADCASTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SEND_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SEND_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SUBSCRIBERS.clone()))?;
    REGISTRY.register(Box::new(PORT_RETRIES_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
