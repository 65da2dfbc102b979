//! Metrics collection.
//!
//! # Metrics
//! - `exec_hijack_handshakes_total` (counter): upgrade attempts by outcome
//!   (`upgraded`, `no_response`, `rejected`, `failed`)
//! - `exec_hijack_relay_bytes_total` (counter): input bytes forwarded by relays
//! - `exec_hijack_relay_failures_total` (counter): relays stopped by a write or read error
//! - `exec_hijack_sessions_total` (counter): exec sessions started
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; installing a recorder is left to the embedder
//! - Low-overhead metric updates (no-ops without a recorder)

use ::metrics::counter;

pub fn record_handshake(outcome: &'static str) {
    counter!("exec_hijack_handshakes_total", "outcome" => outcome).increment(1);
}

pub fn record_relay_bytes(bytes: u64) {
    counter!("exec_hijack_relay_bytes_total").increment(bytes);
}

pub fn record_relay_failure() {
    counter!("exec_hijack_relay_failures_total").increment(1);
}

pub fn record_session_started(tty: bool) {
    counter!("exec_hijack_sessions_total", "tty" => if tty { "true" } else { "false" })
        .increment(1);
}
