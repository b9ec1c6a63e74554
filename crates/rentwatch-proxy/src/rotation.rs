use std::time::Duration;

/// Pause to take between proxy rotations: `base_ms` ± 25 % jitter.
pub(crate) fn jittered_delay(base_ms: u64) -> Duration {
    if base_ms == 0 {
        return Duration::ZERO;
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let delay_ms = (base_ms as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(delay_ms)
}
