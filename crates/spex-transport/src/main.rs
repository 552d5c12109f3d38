//! spex-probe: connect, list the root commutator's slots, follow updates.

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use spex_transport::obs::TransportMetrics;
use spex_transport::{config, Connection, ModuleRegistry, SlotEvent};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "spex.yaml".into());
    let cfg = config::load_from_file(&path).expect("config load failed");

    let metrics = Arc::new(TransportMetrics::default());
    let conn = Connection::connect(&cfg, Arc::clone(&metrics))
        .await
        .expect("failed to open connection");
    let root = conn.root_commutator(ModuleRegistry::standard());

    match root.refresh().await {
        Ok(events) => {
            for event in events {
                print_event(&event);
            }
        }
        Err(status) => {
            tracing::error!(%status, "slot refresh failed");
            return;
        }
    }

    let mut monitor = match root.monitor().await {
        Ok(monitor) => monitor,
        Err(status) => {
            tracing::error!(%status, "monitor subscription failed");
            return;
        }
    };

    loop {
        let event = tokio::select! {
            event = monitor.next_event() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        match event {
            Some(event) => print_event(&event),
            None => {
                tracing::info!(reason = ?monitor.end_reason(), "monitor ended");
                break;
            }
        }
    }

    monitor.close();
    root.shutdown();
    tracing::debug!(metrics = %metrics.render(), "final counters");
}

fn print_event(event: &SlotEvent) {
    match event {
        SlotEvent::Attached(m) => println!("+ slot {:>3}  {:<24} {}", m.slot_id, m.module_type, m.module_name),
        SlotEvent::Detached(m) => println!("- slot {:>3}  {:<24} {}", m.slot_id, m.module_type, m.module_name),
    }
}
