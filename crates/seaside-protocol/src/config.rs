use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// TYPHOON protocol constants, overridable via `TYPHOON_*` environment
/// variables (spec §4.2, §6.3). Built once at startup and threaded
/// through, not a global singleton (spec §9).
#[derive(Debug, Clone)]
pub struct TyphoonConfig {
    pub min_next_in: Duration,
    pub max_next_in: Duration,
    pub initial_next_in_mult: f64,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub default_rtt: Duration,
    pub rtt_mult: u32,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    pub max_retries: u32,
    pub max_tail: usize,
}

impl Default for TyphoonConfig {
    fn default() -> Self {
        Self {
            min_next_in: Duration::from_millis(env_or("TYPHOON_MIN_NEXT_IN", 64)),
            max_next_in: Duration::from_millis(env_or("TYPHOON_MAX_NEXT_IN", 256)),
            initial_next_in_mult: env_or("TYPHOON_INITIAL_NEXT_IN_MULT", 0.05),
            min_rtt: Duration::from_millis(env_or("TYPHOON_MIN_RTT", 1000)),
            max_rtt: Duration::from_millis(env_or("TYPHOON_MAX_RTT", 8000)),
            default_rtt: Duration::from_millis(env_or("TYPHOON_DEFAULT_RTT", 5000)),
            rtt_mult: env_or("TYPHOON_RTT_MULT", 4),
            min_timeout: Duration::from_millis(env_or("TYPHOON_MIN_TIMEOUT", 4000)),
            max_timeout: Duration::from_millis(env_or("TYPHOON_MAX_TIMEOUT", 32000)),
            max_retries: env_or("TYPHOON_MAX_RETRIES", 5),
            max_tail: env_or("TYPHOON_MAX_TAIL", 1024),
        }
    }
}

impl TyphoonConfig {
    /// Initial `next_in` range, active only during the handshake
    /// (spec §4.4.1, server INIT validation).
    pub fn initial_next_in_range(&self) -> (Duration, Duration) {
        (
            self.min_next_in.mul_f64(self.initial_next_in_mult),
            self.max_next_in.mul_f64(self.initial_next_in_mult),
        )
    }

    /// Steady-state `next_in` range, active for every HDSK exchanged after
    /// the handshake completes.
    pub fn steady_next_in_range(&self) -> (Duration, Duration) {
        (self.min_next_in, self.max_next_in)
    }
}

/// PORT protocol constants, overridable via `PORT_*` environment variables.
#[derive(Debug, Clone)]
pub struct PortConfig {
    pub max_tail: usize,
    pub keepalive_idle: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_count: u32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            max_tail: env_or("PORT_MAX_TAIL", 512),
            keepalive_idle: Duration::from_secs(env_or("PORT_KEEPIDLE", 5)),
            keepalive_interval: Duration::from_secs(env_or("PORT_KEEPINTVL", 10)),
            keepalive_count: env_or("PORT_KEEPCNT", 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let typhoon = TyphoonConfig::default();
        assert_eq!(typhoon.min_next_in, Duration::from_millis(64));
        assert_eq!(typhoon.max_next_in, Duration::from_millis(256));
        assert_eq!(typhoon.max_retries, 5);

        let (lo, hi) = typhoon.initial_next_in_range();
        assert_eq!(lo, Duration::from_micros(3_200));
        assert_eq!(hi, Duration::from_micros(12_800));

        let port = PortConfig::default();
        assert_eq!(port.max_tail, 512);
        assert_eq!(port.keepalive_count, 5);
    }
}
