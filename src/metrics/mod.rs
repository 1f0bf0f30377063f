// metrics/mod.rs
use crate::models::HouseId;
use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

pub const COMMANDS_PUBLISHED: &str = "bulb_commands_published_total";
pub const COMMANDS_FAILED: &str = "bulb_commands_failed_total";
pub const BROKER_RECONNECTS: &str = "broker_reconnects_total";

/// Installs the Prometheus recorder with its own scrape listener.
pub fn setup_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_published(house: HouseId) {
    counter!(COMMANDS_PUBLISHED, "house" => house.to_string()).increment(1);
}

pub fn record_failure(reason: &'static str) {
    counter!(COMMANDS_FAILED, "reason" => reason).increment(1);
}

pub fn record_reconnect(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(BROKER_RECONNECTS, "result" => result).increment(1);
}
