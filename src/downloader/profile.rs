use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Lowest average speed the profile will ever report, in MB/s.
pub const MIN_SPEED_MBPS: f64 = 0.01;

const SPEED_WEIGHT: f64 = 0.3;
const RELIABILITY_WEIGHT: f64 = 0.2;

/// Rolling estimate of observed throughput and success rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub average_speed_mbps: f64,
    pub reliability: f64,
    pub last_update: DateTime<Utc>,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self {
            average_speed_mbps: 5.0,
            reliability: 0.8,
            last_update: Utc::now(),
        }
    }
}

impl NetworkProfile {
    /// 0-10 score: up to 5 points for speed, up to 5 for reliability.
    pub fn network_score(&self) -> f64 {
        let speed_score = (self.average_speed_mbps / 2.0).min(5.0);
        let reliability_score = self.reliability * 5.0;
        speed_score + reliability_score
    }
}

/// Handle to the profile shared by the quality selector and the performance monitor.
#[derive(Debug, Clone, Default)]
pub struct SharedNetworkProfile {
    inner: Arc<RwLock<NetworkProfile>>,
}

impl SharedNetworkProfile {
    pub fn new(profile: NetworkProfile) -> Self {
        Self {
            inner: Arc::new(RwLock::new(profile)),
        }
    }

    pub fn snapshot(&self) -> NetworkProfile {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn network_score(&self) -> f64 {
        self.snapshot().network_score()
    }

    /// Folds recent observations into the profile. A non-positive speed leaves speed untouched.
    pub(crate) fn apply_observation(&self, speed_mbps: f64, success_rate: f64) -> NetworkProfile {
        let mut profile = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if speed_mbps.is_finite() && speed_mbps > 0.0 {
            profile.average_speed_mbps =
                profile.average_speed_mbps * (1.0 - SPEED_WEIGHT) + speed_mbps * SPEED_WEIGHT;
        }
        profile.average_speed_mbps = profile.average_speed_mbps.max(MIN_SPEED_MBPS);

        if success_rate.is_finite() {
            let observed = success_rate.clamp(0.0, 1.0);
            profile.reliability = profile.reliability * (1.0 - RELIABILITY_WEIGHT)
                + observed * RELIABILITY_WEIGHT;
        }
        profile.reliability = profile.reliability.clamp(0.0, 1.0);
        profile.last_update = Utc::now();

        profile.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(speed: f64, reliability: f64) -> NetworkProfile {
        NetworkProfile {
            average_speed_mbps: speed,
            reliability,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn default_profile_is_optimistic() {
        let profile = NetworkProfile::default();
        assert_eq!(profile.average_speed_mbps, 5.0);
        assert_eq!(profile.reliability, 0.8);
        assert!((profile.network_score() - 6.5).abs() < 1e-9);
    }

    #[test]
    fn score_caps_speed_contribution() {
        assert!((profile(100.0, 1.0).network_score() - 10.0).abs() < 1e-9);
        assert!((profile(0.0, 0.0).network_score()).abs() < 1e-9);
    }

    #[test]
    fn observation_uses_moving_average_and_stays_bounded() {
        let shared = SharedNetworkProfile::default();
        let updated = shared.apply_observation(10.0, 1.0);
        assert!((updated.average_speed_mbps - 6.5).abs() < 1e-9);
        assert!((updated.reliability - 0.84).abs() < 1e-9);

        let shared = SharedNetworkProfile::new(profile(MIN_SPEED_MBPS, 0.0));
        let updated = shared.apply_observation(0.0, -3.0);
        assert_eq!(updated.average_speed_mbps, MIN_SPEED_MBPS);
        assert_eq!(updated.reliability, 0.0);
    }
}
