//! Latency instrumentation shared by the transport and execution engine.

mod recorder;

pub use recorder::{
    LatencyStats, MetricsRecorder, DEFAULT_WINDOW, ORDER_EXECUTION, PRICE_LOOKUP, STREAM_CONNECT,
};
