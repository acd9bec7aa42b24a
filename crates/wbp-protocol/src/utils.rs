//! Small helpers shared across the protocol crate.

/// Current Unix timestamp in whole seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

/// Current Unix timestamp in milliseconds, the unit frames use on the wire.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_timestamp_is_monotone_with_secs() {
        let secs = current_timestamp();
        let ms = current_timestamp_ms();
        assert!(ms / 1000 >= secs.saturating_sub(1));
    }
}
