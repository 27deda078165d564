//! Per-scalar integration
//!
//! [`step`] advances one [`ScalarState`] toward a goal by one frame delta.
//! It holds no state of its own; everything a run needs lives in the scalar
//! state and the [`SpringConfig`].
//!
//! - Physics: semi-implicit Euler, split into fixed sub-steps so frame
//!   hitches cannot destabilise stiff springs
//! - Duration: eased interpolation from the run's start to the goal
//! - Decay: closed-form exponential velocity decay, ignores the goal

use crate::config::{Mode, SpringConfig};

/// Live state of one animated number
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalarState {
    pub position: f64,
    /// Position at the end of the previous frame
    pub last_position: f64,
    /// Units per second
    pub velocity: f64,
    /// Position when the current run began
    pub start: f64,
    pub initial_velocity: f64,
    pub elapsed_ms: f64,
    pub done: bool,
}

impl ScalarState {
    /// A scalar resting at `position`
    pub fn at_rest(position: f64) -> Self {
        Self {
            position,
            last_position: position,
            velocity: 0.0,
            start: position,
            initial_velocity: 0.0,
            elapsed_ms: 0.0,
            done: true,
        }
    }

    /// Start a new run from the live position
    ///
    /// The live velocity carries over unless `velocity` overrides it.
    pub fn begin(&mut self, velocity: Option<f64>) {
        if let Some(velocity) = velocity {
            self.velocity = velocity;
        }
        self.start = self.position;
        self.initial_velocity = self.velocity;
        self.elapsed_ms = 0.0;
        self.done = false;
    }

    /// Jump to `position` and stop
    pub fn snap(&mut self, position: f64) {
        self.position = position;
        self.velocity = 0.0;
        self.done = true;
    }
}

/// What a step did to the scalar
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Moving,
    /// Reached its goal (or came to rest, in decay mode)
    Settled,
    /// Produced a non-finite value; the scalar was snapped to its goal
    Unstable,
}

/// Advance `state` toward `goal` by `dt_ms`
pub fn step(
    state: &mut ScalarState,
    goal: f64,
    config: &SpringConfig,
    dt_ms: f64,
    substep_ms: f64,
) -> Outcome {
    if state.done {
        return Outcome::Settled;
    }
    if dt_ms <= 0.0 {
        return Outcome::Moving;
    }

    match config.mode() {
        Mode::Physics => step_physics(state, goal, config, dt_ms, substep_ms),
        Mode::Duration(duration) => step_duration(state, goal, config, duration, dt_ms),
        Mode::Decay(decay) => step_decay(state, config, decay, dt_ms),
    }

    if !state.position.is_finite() || !state.velocity.is_finite() {
        state.snap(goal);
        return Outcome::Unstable;
    }
    if state.done {
        Outcome::Settled
    } else {
        Outcome::Moving
    }
}

fn step_physics(
    state: &mut ScalarState,
    goal: f64,
    config: &SpringConfig,
    dt_ms: f64,
    substep_ms: f64,
) {
    let (tension, friction) = config.tension_friction();
    let mass = config.mass;
    let precision = config.precision_for(state.start, goal);
    let rest_velocity = config.rest_velocity_for(precision);

    // Clamping is bouncing with a zero restitution factor
    let bounce = if config.clamp { Some(0.0) } else { config.bounce };
    let growing = if state.start == goal {
        state.initial_velocity > 0.0
    } else {
        state.start < goal
    };

    let substeps = (dt_ms / substep_ms.max(0.01)).ceil().max(1.0) as usize;
    let h = dt_ms / substeps as f64 / 1000.0;

    let at_rest = |state: &ScalarState| {
        state.velocity.abs() <= rest_velocity && (goal - state.position).abs() <= precision
    };

    for _ in 0..substeps {
        if at_rest(state) {
            state.snap(goal);
            return;
        }

        let force = -tension * (state.position - goal) - friction * state.velocity;
        state.velocity += force / mass * h;
        state.position += state.velocity * h;

        if let Some(bounce) = bounce {
            let crossed = if growing {
                state.position > goal
            } else {
                state.position < goal
            };
            if crossed {
                if bounce == 0.0 {
                    state.snap(goal);
                    return;
                }
                state.position = goal;
                state.velocity = -state.velocity * bounce;
            }
        }
    }

    if at_rest(state) {
        state.snap(goal);
    }
}

fn step_duration(
    state: &mut ScalarState,
    goal: f64,
    config: &SpringConfig,
    duration: f64,
    dt_ms: f64,
) {
    state.elapsed_ms += dt_ms;
    if state.elapsed_ms >= duration {
        state.snap(goal);
        return;
    }

    let progress = (state.elapsed_ms / duration).clamp(0.0, 1.0);
    let previous = state.position;
    state.position = state.start + (goal - state.start) * config.easing.apply(progress);
    state.velocity = (state.position - previous) / (dt_ms / 1000.0);
}

fn step_decay(state: &mut ScalarState, config: &SpringConfig, decay: f64, dt_ms: f64) {
    state.elapsed_ms += dt_ms;

    let loss = (1.0 - decay).max(1e-9);
    let falloff = (-loss * state.elapsed_ms).exp();
    state.position = state.start + (state.initial_velocity / 1000.0) / loss * (1.0 - falloff);
    state.velocity = state.initial_velocity * falloff;

    let precision = config.precision.unwrap_or(RESTING_DECAY_PRECISION);
    if state.velocity.abs() < config.rest_velocity_for(precision) {
        state.velocity = 0.0;
        state.done = true;
    }
}

const RESTING_DECAY_PRECISION: f64 = 0.005;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::easing::Easing;

    fn run(state: &mut ScalarState, goal: f64, config: &SpringConfig, max_frames: usize) -> usize {
        for frame in 1..=max_frames {
            if step(state, goal, config, 16.0, 1.0) != Outcome::Moving {
                return frame;
            }
        }
        panic!("did not settle within {max_frames} frames");
    }

    #[test]
    fn test_default_spring_settles_exactly() {
        let mut state = ScalarState::at_rest(0.0);
        state.begin(None);
        let frames = run(&mut state, 1.0, &SpringConfig::default(), 200);
        assert!(frames > 10);
        assert_eq!(state.position, 1.0);
        assert_eq!(state.velocity, 0.0);
        assert!(state.done);
    }

    #[test]
    fn test_wobbly_overshoots_unless_clamped() {
        let mut free = ScalarState::at_rest(0.0);
        free.begin(None);
        let mut peak: f64 = 0.0;
        while step(&mut free, 100.0, &SpringConfig::wobbly(), 16.0, 1.0) == Outcome::Moving {
            peak = peak.max(free.position);
        }
        assert!(peak > 100.0);

        let clamped_config = SpringConfig::wobbly().with_clamp(true);
        let mut clamped = ScalarState::at_rest(0.0);
        clamped.begin(None);
        while step(&mut clamped, 100.0, &clamped_config, 16.0, 1.0) == Outcome::Moving {
            assert!(clamped.position <= 100.0);
        }
        assert_eq!(clamped.position, 100.0);
    }

    #[test]
    fn test_hitch_is_substepped() {
        let config = SpringConfig::new(1000.0, 10.0);
        let mut state = ScalarState::at_rest(0.0);
        state.begin(None);
        step(&mut state, 1.0, &config, 250.0, 1.0);
        assert!(state.position.is_finite());
        assert!(state.position.abs() < 10.0);
    }

    #[test]
    fn test_duration_follows_easing() {
        let config = SpringConfig::default()
            .with_duration(100.0)
            .with_easing(Easing::Linear);
        let mut state = ScalarState::at_rest(0.0);
        state.begin(None);

        assert_eq!(step(&mut state, 10.0, &config, 50.0, 1.0), Outcome::Moving);
        assert!((state.position - 5.0).abs() < 1e-9);
        assert_eq!(step(&mut state, 10.0, &config, 60.0, 1.0), Outcome::Settled);
        assert_eq!(state.position, 10.0);
    }

    #[test]
    fn test_decay_coasts_to_rest() {
        let config = SpringConfig::default().decaying();
        let mut state = ScalarState::at_rest(0.0);
        state.begin(Some(1000.0));
        run(&mut state, 0.0, &config, 1000);
        // v0 / 1000 / (1 - 0.998)
        assert!((state.position - 500.0).abs() < 1.0);
        assert_eq!(state.velocity, 0.0);
    }

    #[test]
    fn test_non_finite_snaps_to_goal() {
        let config = SpringConfig::default().with_mass(0.0);
        let mut state = ScalarState::at_rest(0.0);
        state.begin(None);
        assert_eq!(step(&mut state, 5.0, &config, 16.0, 1.0), Outcome::Unstable);
        assert_eq!(state.position, 5.0);
        assert!(state.done);
    }

    #[test]
    fn test_resting_state_is_settled() {
        let mut state = ScalarState::at_rest(3.0);
        assert_eq!(
            step(&mut state, 3.0, &SpringConfig::default(), 16.0, 1.0),
            Outcome::Settled
        );
    }
}
