//! Serde default helpers for configuration fields.

pub fn ping_interval_secs() -> u64 {
    90
}

pub fn unregistered_timeout_secs() -> u64 {
    30
}

pub fn sasl_step_timeout_secs() -> u64 {
    60
}

pub fn max_channels_per_user() -> usize {
    50
}

pub fn max_queue_msgs() -> usize {
    256
}

pub fn max_queue_bytes() -> usize {
    1024 * 1024
}

pub fn max_penalty_ms() -> u64 {
    10_000
}

pub fn connections_per_second() -> u32 {
    1
}

pub fn connection_burst() -> u32 {
    4
}

pub fn listen_addr() -> String {
    "0.0.0.0:6667".to_string()
}

pub fn link_port() -> u16 {
    7000
}

pub fn truthy() -> bool {
    true
}
