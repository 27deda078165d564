//! Spring configuration and clock-wide animation settings
//!
//! A [`SpringConfig`] drives one run in exactly one [`Mode`]. When several
//! modes are configured at once the priority is duration, then decay, then
//! physics.

use crate::easing::Easing;
use crate::error::{AnimationError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Velocity retention per millisecond used by [`SpringConfig::decaying`]
pub const DEFAULT_DECAY: f64 = 0.998;

/// Precision used when a run starts on its goal
const RESTING_PRECISION: f64 = 0.005;

/// Which integrator drives a run
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    /// Damped oscillator using tension, friction and mass
    Physics,
    /// Eased interpolation over a fixed time in milliseconds
    Duration(f64),
    /// Exponential velocity decay with the given per-ms retention factor
    Decay(f64),
}

/// Configuration for a spring animation
///
/// Velocities are in units per second, times in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringConfig {
    pub mass: f64,
    pub tension: f64,
    pub friction: f64,
    /// Stop at the goal instead of overshooting it
    pub clamp: bool,
    /// Reflect velocity by this factor when the goal is crossed
    pub bounce: Option<f64>,
    /// Initial velocity override; otherwise the live velocity is kept
    pub velocity: Option<f64>,
    /// Distance from the goal considered "arrived"
    pub precision: Option<f64>,
    /// Speed below which the value is considered at rest
    pub rest_velocity: Option<f64>,
    pub duration: Option<f64>,
    pub decay: Option<f64>,
    pub easing: Easing,
    /// Oscillation period in seconds; derives tension and friction when set
    pub frequency: Option<f64>,
    pub damping_ratio: f64,
}

impl SpringConfig {
    /// Create a physics config from tension and friction (mass 1)
    pub fn new(tension: f64, friction: f64) -> Self {
        Self {
            mass: 1.0,
            tension,
            friction,
            clamp: false,
            bounce: None,
            velocity: None,
            precision: None,
            rest_velocity: None,
            duration: None,
            decay: None,
            easing: Easing::Linear,
            frequency: None,
            damping_ratio: 1.0,
        }
    }

    /// Slow and soft, little overshoot
    pub fn gentle() -> Self {
        Self::new(120.0, 14.0)
    }

    /// Visible overshoot and oscillation
    pub fn wobbly() -> Self {
        Self::new(180.0, 12.0)
    }

    pub fn stiff() -> Self {
        Self::new(210.0, 20.0)
    }

    pub fn slow() -> Self {
        Self::new(280.0, 60.0)
    }

    /// Heavily overdamped
    pub fn molasses() -> Self {
        Self::new(280.0, 120.0)
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "gentle" => Some(Self::gentle()),
            "wobbly" => Some(Self::wobbly()),
            "stiff" => Some(Self::stiff()),
            "slow" => Some(Self::slow()),
            "molasses" => Some(Self::molasses()),
            _ => None,
        }
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_clamp(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    pub fn with_bounce(mut self, bounce: f64) -> Self {
        self.bounce = Some(bounce);
        self
    }

    pub fn with_velocity(mut self, velocity: f64) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_rest_velocity(mut self, rest_velocity: f64) -> Self {
        self.rest_velocity = Some(rest_velocity);
        self
    }

    /// Switch to duration mode (milliseconds)
    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration = Some(duration_ms);
        self
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Switch to decay mode with a per-ms retention factor in `(0, 1)`
    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = Some(decay);
        self
    }

    /// Switch to decay mode with [`DEFAULT_DECAY`]
    pub fn decaying(self) -> Self {
        self.with_decay(DEFAULT_DECAY)
    }

    /// Parameterise by oscillation period (seconds) and damping ratio
    pub fn with_frequency(mut self, frequency: f64, damping_ratio: f64) -> Self {
        self.frequency = Some(frequency);
        self.damping_ratio = damping_ratio;
        self
    }

    /// Resolve the run mode: duration, then decay, then physics
    pub fn mode(&self) -> Mode {
        if let Some(duration) = self.duration {
            Mode::Duration(duration)
        } else if let Some(decay) = self.decay {
            Mode::Decay(decay)
        } else {
            Mode::Physics
        }
    }

    /// Reject settings no integrator can finish a run with
    pub fn validate(&self) -> Result<()> {
        if let Some(decay) = self.decay {
            if !(decay > 0.0 && decay < 1.0) {
                return Err(AnimationError::InvalidConfig(
                    "decay must be strictly between 0 and 1",
                ));
            }
        }
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration < 0.0 {
                return Err(AnimationError::InvalidConfig(
                    "duration must be finite and non-negative",
                ));
            }
        }
        Ok(())
    }

    /// Effective `(tension, friction)`, honouring the frequency parameterisation
    pub fn tension_friction(&self) -> (f64, f64) {
        match self.frequency {
            Some(frequency) if frequency > 0.0 => {
                let tension = (2.0 * PI / frequency).powi(2) * self.mass;
                let friction = 4.0 * PI * self.damping_ratio * self.mass / frequency;
                (tension, friction)
            }
            _ => (self.tension, self.friction),
        }
    }

    /// Arrival distance for a run from `start` to `goal`
    pub fn precision_for(&self, start: f64, goal: f64) -> f64 {
        self.precision.unwrap_or_else(|| {
            if start == goal {
                RESTING_PRECISION
            } else {
                ((goal - start).abs() * 0.001).min(1.0)
            }
        })
    }

    /// Rest speed for a run using `precision`
    pub fn rest_velocity_for(&self, precision: f64) -> f64 {
        self.rest_velocity.unwrap_or(precision * 100.0)
    }
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self::new(170.0, 26.0)
    }
}

/// Settings shared by every spring on one clock
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationGlobals {
    /// Treat every request as `immediate`
    pub skip_animation: bool,
    /// Physics sub-step length in milliseconds
    pub substep_ms: f64,
    /// Frame deltas are clamped to this many milliseconds
    pub max_frame_ms: f64,
}

impl AnimationGlobals {
    /// Parse globals from a TOML document; missing fields keep their defaults
    ///
    /// ```
    /// use tension_animation::AnimationGlobals;
    ///
    /// let globals = AnimationGlobals::from_toml_str("skip_animation = true").unwrap();
    /// assert!(globals.skip_animation);
    /// assert_eq!(globals.substep_ms, 1.0);
    /// ```
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

impl Default for AnimationGlobals {
    fn default() -> Self {
        Self {
            skip_animation: false,
            substep_ms: 1.0,
            max_frame_ms: 250.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_priority() {
        let config = SpringConfig::default();
        assert_eq!(config.mode(), Mode::Physics);
        assert_eq!(config.decaying().mode(), Mode::Decay(DEFAULT_DECAY));
        assert_eq!(
            config.decaying().with_duration(300.0).mode(),
            Mode::Duration(300.0)
        );
    }

    #[test]
    fn test_validate_rejects_endless_runs() {
        assert!(SpringConfig::default().validate().is_ok());
        assert!(SpringConfig::default().decaying().validate().is_ok());
        for decay in [0.0, 1.0, 1.5, -0.2, f64::NAN] {
            let err = SpringConfig::default().with_decay(decay).validate().unwrap_err();
            assert!(matches!(err, AnimationError::InvalidConfig(_)));
            assert!(err.is_configuration());
        }
        for duration in [f64::INFINITY, f64::NAN, -1.0] {
            assert!(SpringConfig::default().with_duration(duration).validate().is_err());
        }
        assert!(SpringConfig::default().with_duration(0.0).validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(SpringConfig::preset("default"), Some(SpringConfig::new(170.0, 26.0)));
        assert_eq!(SpringConfig::preset("molasses").map(|c| c.friction), Some(120.0));
        assert!(SpringConfig::preset("bogus").is_none());
    }

    #[test]
    fn test_frequency_derives_tension_and_friction() {
        let config = SpringConfig::default().with_frequency(0.5, 1.0);
        let (tension, friction) = config.tension_friction();
        assert!((tension - (4.0 * PI).powi(2)).abs() < 1e-9);
        assert!((friction - 8.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_default_precision() {
        let config = SpringConfig::default();
        assert_eq!(config.precision_for(3.0, 3.0), RESTING_PRECISION);
        assert!((config.precision_for(0.0, 100.0) - 0.1).abs() < 1e-12);
        assert_eq!(config.precision_for(0.0, 1e6), 1.0);
        assert!((config.rest_velocity_for(0.1) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_from_toml() {
        let config: SpringConfig = toml::from_str(
            r#"
            tension = 300.0
            clamp = true
            easing = "ease-out-cubic"
            "#,
        )
        .unwrap();
        assert_eq!(config.tension, 300.0);
        assert_eq!(config.friction, 26.0);
        assert!(config.clamp);
        assert_eq!(config.easing, Easing::EaseOutCubic);
    }

    #[test]
    fn test_globals_from_toml() {
        let globals = AnimationGlobals::from_toml_str("max_frame_ms = 100.0").unwrap();
        assert_eq!(globals.max_frame_ms, 100.0);
        assert!(!globals.skip_animation);
        assert!(AnimationGlobals::from_toml_str("substep_ms = \"fast\"").is_err());
    }
}
