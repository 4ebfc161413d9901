use std::{sync::OnceLock, time::Instant};

static START: OnceLock<Instant> = OnceLock::new();

pub fn clock_init() {
    START.get_or_init(Instant::now);
}

fn since_start() -> std::time::Duration {
    START.get_or_init(Instant::now).elapsed()
}

/// Wraps like the firmware's millisecond counter.
pub fn millis() -> u32 {
    since_start().as_millis() as u32
}

pub fn micros() -> u64 {
    since_start().as_micros() as u64
}
