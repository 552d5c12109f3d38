//! Transport counters, gauges and latency histograms.
//!
//! Counters live in atomics behind `DashMap`s and are shared explicitly as an
//! `Arc<TransportMetrics>`; rendering follows the Prometheus text format.

pub mod metrics;

pub use metrics::TransportMetrics;
