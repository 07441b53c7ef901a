//! Activity controller - adaptive sampling policy.
//!
//! Tracks how much motion the node sees locally and what its neighbors
//! report, and turns the combined activation into the wait between control
//! ticks:
//!
//! ```text
//! interval
//!   max ┤━━━━━━━━━━┓
//!       │          ┃╲
//!       │          ┃  ╲
//!   min ┤          ┃    ╲━━━━━━━━━━
//!       └──────────┸─────┸──────────▶ local + neighbor
//!               threshold  saturation
//! ```
//!
//! Below the threshold the node idles at the maximum interval; between the
//! threshold and saturation the interval shrinks linearly; at or above
//! saturation it samples at the minimum interval.

use std::fmt;
use std::time::Duration;

/// Tuning constants for the activation-to-interval curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityConfig {
    /// Multiplier applied to the active-pixel fraction.
    pub activation_gain: f32,

    /// Combined activation below which the node is considered idle.
    pub threshold: f32,

    /// Combined activation at which sampling reaches `min_interval`.
    pub saturation: f32,

    /// Fastest sampling interval.
    pub min_interval: Duration,

    /// Idle sampling interval.
    pub max_interval: Duration,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            activation_gain: 1.0,
            threshold: 0.1,
            saturation: 1.0,
            min_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
        }
    }
}

impl ActivityConfig {
    /// Sample interval for a combined activation level.
    ///
    /// Non-increasing in `combined` and always within
    /// `[min_interval, max_interval]`.
    pub fn interval_for(&self, combined: f32) -> Duration {
        if combined < self.threshold {
            return self.max_interval;
        }
        if combined >= self.saturation {
            return self.min_interval;
        }

        let t = f64::from((combined - self.threshold) / (self.saturation - self.threshold));
        let max = self.max_interval.as_secs_f64();
        let min = self.min_interval.as_secs_f64();
        let secs = max - (max - min) * t.clamp(0.0, 1.0);

        Duration::from_secs_f64(secs).clamp(self.min_interval, self.max_interval)
    }
}

/// Owns the node's activation state.
///
/// Pure state transitions; no I/O. Only the control loop mutates it.
#[derive(Debug, Clone)]
pub struct ActivityController {
    config: ActivityConfig,
    local_activation_level: f32,
    neighbor_activation_level: f32,
    sample_interval: Duration,
    below_threshold: bool,
}

impl ActivityController {
    /// Create a controller at rest (no local or neighbor activation).
    pub fn new(config: ActivityConfig) -> Self {
        let mut controller = Self {
            config,
            local_activation_level: 0.0,
            neighbor_activation_level: 0.0,
            sample_interval: Duration::ZERO,
            below_threshold: true,
        };
        controller.recompute();
        controller
    }

    /// Fold in the fraction of changed pixels from the latest frame.
    pub fn update_from_local_reading(&mut self, percentage: f32) {
        let percentage = sanitize(percentage).min(1.0);
        self.local_activation_level = percentage * self.config.activation_gain;
        self.recompute();
    }

    /// Replace the neighbor activation relayed by the server.
    pub fn update_from_neighbor_report(&mut self, level: f32) {
        self.neighbor_activation_level = sanitize(level);
        self.recompute();
    }

    /// Wait before the next control tick.
    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Local activation level reported to the server.
    pub fn activation_level(&self) -> f32 {
        self.local_activation_level
    }

    pub fn neighbor_activation_level(&self) -> f32 {
        self.neighbor_activation_level
    }

    /// Local plus neighbor activation.
    pub fn combined_activation(&self) -> f32 {
        self.local_activation_level + self.neighbor_activation_level
    }

    /// True iff combined activation is strictly under the threshold.
    pub fn is_below_threshold(&self) -> bool {
        self.below_threshold
    }

    /// One-line summary for logs.
    pub fn describe_state(&self) -> String {
        self.to_string()
    }

    fn recompute(&mut self) {
        let combined = self.combined_activation();
        self.below_threshold = combined < self.config.threshold;
        self.sample_interval = self.config.interval_for(combined);
    }
}

impl Default for ActivityController {
    fn default() -> Self {
        Self::new(ActivityConfig::default())
    }
}

impl fmt::Display for ActivityController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "activation local={:.3} neighbor={:.3} combined={:.3} interval={}ms below_threshold={}",
            self.local_activation_level,
            self.neighbor_activation_level,
            self.combined_activation(),
            self.sample_interval.as_millis(),
            self.below_threshold,
        )
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    proptest! {
        #[test]
        fn interval_never_grows_with_activation(
            a in 0.0f32..2.0,
            b in 0.0f32..2.0,
            neighbor in 0.0f32..2.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let mut controller = ActivityController::default();
            controller.update_from_neighbor_report(neighbor);

            controller.update_from_local_reading(low);
            let slow = controller.sample_interval();
            controller.update_from_local_reading(high);
            let fast = controller.sample_interval();

            prop_assert!(fast <= slow);
        }

        #[test]
        fn interval_is_bounded(percentage in -1.0f32..2.0, neighbor in -1.0f32..10.0) {
            let mut controller = ActivityController::default();
            controller.update_from_local_reading(percentage);
            controller.update_from_neighbor_report(neighbor);

            let config = ActivityConfig::default();
            prop_assert!(controller.sample_interval() >= config.min_interval);
            prop_assert!(controller.sample_interval() <= config.max_interval);
        }
    }

    #[test]
    fn test_starts_idle() {
        let controller = ActivityController::default();
        assert_eq!(controller.activation_level(), 0.0);
        assert_eq!(controller.neighbor_activation_level(), 0.0);
        assert!(controller.is_below_threshold());
        assert_eq!(controller.sample_interval(), Duration::from_secs(2));
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(0.05, true)]
    #[case(0.099, true)]
    #[case(0.1, false)]
    #[case(0.5, false)]
    fn test_threshold_gating(#[case] neighbor: f32, #[case] below: bool) {
        let mut controller = ActivityController::default();
        controller.update_from_neighbor_report(neighbor);
        assert_eq!(controller.is_below_threshold(), below);
    }

    #[test]
    fn test_threshold_boundary_is_not_below() {
        let config = ActivityConfig::default();
        let mut controller = ActivityController::new(config.clone());
        controller.update_from_local_reading(config.threshold);

        assert!(!controller.is_below_threshold());
        assert_eq!(controller.sample_interval(), config.max_interval);
    }

    #[test]
    fn test_low_reading_idles_at_max_interval() {
        let mut controller = ActivityController::default();
        controller.update_from_local_reading(0.02);

        assert!((controller.activation_level() - 0.02).abs() < f32::EPSILON);
        assert!(controller.is_below_threshold());
        assert_eq!(controller.sample_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_neighbor_activity_shortens_interval() {
        let mut controller = ActivityController::default();
        controller.update_from_local_reading(0.02);
        let idle = controller.sample_interval();

        controller.update_from_neighbor_report(0.9);

        assert!(controller.sample_interval() < idle);
        assert!(!controller.is_below_threshold());
    }

    #[test]
    fn test_saturation_hits_min_interval() {
        let mut controller = ActivityController::default();
        controller.update_from_local_reading(1.0);
        assert_eq!(controller.sample_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_midpoint_is_linear() {
        let config = ActivityConfig::default();
        // Halfway between threshold 0.1 and saturation 1.0.
        let interval = config.interval_for(0.55);
        assert!((interval.as_secs_f64() - 1.1).abs() < 1e-3);
    }

    #[test]
    fn test_gain_scales_local_activation() {
        let mut controller = ActivityController::new(ActivityConfig {
            activation_gain: 4.0,
            ..ActivityConfig::default()
        });
        controller.update_from_local_reading(0.05);
        assert!((controller.activation_level() - 0.2).abs() < 1e-6);
        assert!(!controller.is_below_threshold());
    }

    #[test]
    fn test_invalid_inputs_are_sanitized() {
        let mut controller = ActivityController::default();
        controller.update_from_local_reading(f32::NAN);
        controller.update_from_neighbor_report(-3.0);

        assert_eq!(controller.activation_level(), 0.0);
        assert_eq!(controller.neighbor_activation_level(), 0.0);
        assert!(controller.is_below_threshold());
    }

    #[test]
    fn test_describe_state() {
        let mut controller = ActivityController::default();
        controller.update_from_neighbor_report(0.25);

        let description = controller.describe_state();
        assert!(description.contains("neighbor=0.250"));
        assert!(description.contains("below_threshold=false"));
    }
}
