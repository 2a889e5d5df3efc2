use std::time::Duration;

use rand::Rng;

/// Relative cost class of a backend operation. Reads are light, listing and
/// search are medium, anything that appends or synthesizes content is heavy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpWeight {
    Light,
    Medium,
    Heavy,
}

/// How much artificial latency the simulated backend injects before
/// resolving a call. `Disabled` keeps tests instantaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyProfile {
    Disabled,
    Fast,
    #[default]
    Realistic,
}

impl LatencyProfile {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Some(Self::Disabled),
            "fast" => Some(Self::Fast),
            "realistic" => Some(Self::Realistic),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Fast => "fast",
            Self::Realistic => "realistic",
        }
    }

    fn delay_bounds_ms(self, weight: OpWeight) -> Option<(u64, u64)> {
        match self {
            Self::Disabled => None,
            Self::Fast => Some(match weight {
                OpWeight::Light => (5, 15),
                OpWeight::Medium => (10, 40),
                OpWeight::Heavy => (25, 80),
            }),
            Self::Realistic => Some(match weight {
                OpWeight::Light => (40, 120),
                OpWeight::Medium => (150, 450),
                OpWeight::Heavy => (600, 1_500),
            }),
        }
    }

    /// Suspends the caller for a jittered delay proportional to the
    /// operation weight. Resolves immediately when the profile is disabled.
    pub async fn simulate(self, weight: OpWeight) {
        let Some((low_ms, high_ms)) = self.delay_bounds_ms(weight) else {
            return;
        };

        let delay_ms = rand::rng().random_range(low_ms..=high_ms);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_names_roundtrip_through_parse() {
        for profile in [
            LatencyProfile::Disabled,
            LatencyProfile::Fast,
            LatencyProfile::Realistic,
        ] {
            assert_eq!(LatencyProfile::parse(profile.name()), Some(profile));
        }
        assert_eq!(LatencyProfile::parse("OFF"), Some(LatencyProfile::Disabled));
        assert_eq!(LatencyProfile::parse("instant"), None);
    }

    #[test]
    fn heavier_weights_never_shrink_the_delay_window() {
        for profile in [LatencyProfile::Fast, LatencyProfile::Realistic] {
            let (light_low, light_high) = profile.delay_bounds_ms(OpWeight::Light).unwrap();
            let (medium_low, medium_high) = profile.delay_bounds_ms(OpWeight::Medium).unwrap();
            let (heavy_low, heavy_high) = profile.delay_bounds_ms(OpWeight::Heavy).unwrap();
            assert!(light_low <= medium_low && medium_low <= heavy_low);
            assert!(light_high <= medium_high && medium_high <= heavy_high);
        }
    }
}
