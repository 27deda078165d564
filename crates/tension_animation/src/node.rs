//! Animated nodes
//!
//! An [`AnimatedNode`] owns the numeric state behind one spring: a single
//! [`ScalarState`] or a fixed-length list of them. [`AnimatedNode::create`]
//! is the only place that dispatches on the value's shape; everything above
//! it works with nodes and [`AnimatableValue`]s.

use crate::config::SpringConfig;
use crate::error::{AnimationError, Result};
use crate::integrator::{self, Outcome, ScalarState};
use smallvec::SmallVec;
use tension_core::{AnimatableValue, ValueShape};

/// Numeric state for a scalar or array spring
#[derive(Clone, Debug, PartialEq)]
pub enum AnimatedNode {
    Scalar(ScalarState),
    Array(SmallVec<[ScalarState; 4]>),
}

/// Summary of one node step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Some lane moved this frame
    pub changed: bool,
    /// Every lane is done
    pub done: bool,
    /// Some lane went non-finite and was snapped
    pub unstable: bool,
}

impl AnimatedNode {
    /// Build a resting node with the shape of `value`
    pub fn create(value: &AnimatableValue) -> Self {
        match value {
            AnimatableValue::Scalar(v) => AnimatedNode::Scalar(ScalarState::at_rest(*v)),
            AnimatableValue::Array(values) => {
                AnimatedNode::Array(values.iter().map(|v| ScalarState::at_rest(*v)).collect())
            }
        }
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            AnimatedNode::Scalar(_) => ValueShape::Scalar,
            AnimatedNode::Array(lanes) => ValueShape::Array(lanes.len()),
        }
    }

    pub fn lanes(&self) -> &[ScalarState] {
        match self {
            AnimatedNode::Scalar(state) => std::slice::from_ref(state),
            AnimatedNode::Array(lanes) => lanes.as_slice(),
        }
    }

    fn lanes_mut(&mut self) -> &mut [ScalarState] {
        match self {
            AnimatedNode::Scalar(state) => std::slice::from_mut(state),
            AnimatedNode::Array(lanes) => lanes.as_mut_slice(),
        }
    }

    /// Current value
    pub fn value(&self) -> AnimatableValue {
        self.collect(|lane| lane.position)
    }

    /// Current velocity per lane (units per second)
    pub fn velocity(&self) -> AnimatableValue {
        self.collect(|lane| lane.velocity)
    }

    fn collect(&self, field: impl Fn(&ScalarState) -> f64) -> AnimatableValue {
        match self {
            AnimatedNode::Scalar(state) => AnimatableValue::Scalar(field(state)),
            AnimatedNode::Array(lanes) => AnimatableValue::Array(lanes.iter().map(field).collect()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.lanes().iter().all(|lane| lane.done)
    }

    fn check_shape(&self, value: &AnimatableValue) -> Result<()> {
        if value.shape() == self.shape() {
            Ok(())
        } else {
            Err(AnimationError::ShapeMismatch {
                expected: self.shape(),
                found: value.shape(),
            })
        }
    }

    /// Overwrite every lane and stop
    pub fn set_value(&mut self, value: &AnimatableValue) -> Result<()> {
        self.check_shape(value)?;
        for (lane, v) in self.lanes_mut().iter_mut().zip(value.as_slice()) {
            *lane = ScalarState::at_rest(*v);
        }
        Ok(())
    }

    /// Start a run on every lane from the live state
    pub fn begin(&mut self, velocity: Option<f64>) {
        for lane in self.lanes_mut() {
            lane.begin(velocity);
        }
    }

    /// Restart lanes that already stopped but no longer sit on `goal`
    pub fn retarget(&mut self, goal: &AnimatableValue) {
        for (lane, g) in self.lanes_mut().iter_mut().zip(goal.as_slice()) {
            if lane.done && lane.position != *g {
                lane.begin(None);
            }
        }
    }

    /// Jump every lane to `goal` and stop
    pub fn snap(&mut self, goal: &AnimatableValue) {
        for (lane, g) in self.lanes_mut().iter_mut().zip(goal.as_slice()) {
            lane.snap(*g);
        }
    }

    /// Freeze in place
    pub fn halt(&mut self) {
        for lane in self.lanes_mut() {
            let position = lane.position;
            lane.snap(position);
        }
    }

    /// Advance every lane toward `goal` by one frame
    pub fn step(
        &mut self,
        goal: &AnimatableValue,
        config: &SpringConfig,
        dt_ms: f64,
        substep_ms: f64,
    ) -> StepReport {
        let mut report = StepReport {
            done: true,
            ..StepReport::default()
        };

        for (lane, g) in self.lanes_mut().iter_mut().zip(goal.as_slice()) {
            lane.last_position = lane.position;
            match integrator::step(lane, *g, config, dt_ms, substep_ms) {
                Outcome::Moving => report.done = false,
                Outcome::Settled => {}
                Outcome::Unstable => report.unstable = true,
            }
            if lane.position != lane.last_position {
                report.changed = true;
            }
        }
        report
    }
}
