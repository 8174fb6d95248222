use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lane scheduler configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lane Scheduler concurrency and debounce settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    /// Maximum number of lanes (sessions) allowed to run concurrently
    /// across the whole gateway. Clamped to `1..=256`.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Debounce window, in milliseconds, for coalescing rapid-fire
    /// inbound envelopes into a single turn. `0` disables debounce.
    #[serde(default)]
    pub debounce_ms: u64,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            debounce_ms: 0,
        }
    }
}

impl LaneConfig {
    /// Clamp `max_in_flight` to the allowed range `1..=256`.
    pub fn clamped(&self) -> Self {
        Self {
            max_in_flight: self.max_in_flight.clamp(1, 256),
            debounce_ms: self.debounce_ms,
        }
    }

    pub fn debounce_window(&self) -> Option<std::time::Duration> {
        if self.debounce_ms == 0 {
            None
        } else {
            Some(std::time::Duration::from_millis(self.debounce_ms))
        }
    }
}

fn default_max_in_flight() -> usize {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_in_flight_is_32_and_debounce_off() {
        let cfg = LaneConfig::default();
        assert_eq!(cfg.max_in_flight, 32);
        assert!(cfg.debounce_window().is_none());
    }

    #[test]
    fn clamp_below_min() {
        let cfg = LaneConfig { max_in_flight: 0, debounce_ms: 0 };
        assert_eq!(cfg.clamped().max_in_flight, 1);
    }

    #[test]
    fn clamp_above_max() {
        let cfg = LaneConfig { max_in_flight: 10_000, debounce_ms: 0 };
        assert_eq!(cfg.clamped().max_in_flight, 256);
    }

    #[test]
    fn debounce_window_converts_millis() {
        let cfg = LaneConfig { max_in_flight: 4, debounce_ms: 250 };
        assert_eq!(cfg.debounce_window(), Some(std::time::Duration::from_millis(250)));
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: LaneConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_in_flight, 32);
        assert_eq!(cfg.debounce_ms, 0);
    }
}
