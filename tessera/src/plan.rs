//! Acquisition plans: the enumerable set of events for one imaging round.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{AcquisitionEvent, Channel, EventIndex};

/// Acquisition axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    P,
    T,
    C,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::T, Axis::P, Axis::C, Axis::Z];
}

/// Stage coordinates in microns. Unset axes keep the current hardware value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePosition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl StagePosition {
    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }
}

fn default_axis_order() -> Vec<Axis> {
    Axis::ALL.to_vec()
}

/// Full description of one imaging round.
///
/// Plans are replaced, not mutated: `with_stage_positions` and
/// `with_channels` return a new plan with a fresh id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionPlan {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    #[serde(default = "default_axis_order")]
    axis_order: Vec<Axis>,
    #[serde(default)]
    stage_positions: Vec<StagePosition>,
    #[serde(default)]
    channels: Vec<Channel>,
    /// Relative z offsets around each position's z.
    #[serde(default)]
    z_offsets: Vec<f64>,
    #[serde(default)]
    time_loops: usize,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for AcquisitionPlan {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            axis_order: default_axis_order(),
            stage_positions: Vec::new(),
            channels: Vec::new(),
            z_offsets: Vec::new(),
            time_loops: 0,
            metadata: serde_json::Map::new(),
        }
    }
}

impl AcquisitionPlan {
    pub fn new(
        stage_positions: Vec<StagePosition>,
        channels: Vec<Channel>,
        z_offsets: Vec<f64>,
    ) -> Self {
        Self {
            stage_positions,
            channels,
            z_offsets,
            ..Default::default()
        }
    }

    /// Symmetric z range of `range` microns sampled every `step` microns.
    pub fn z_range(range: f64, step: f64) -> Vec<f64> {
        if step <= 0.0 || range <= 0.0 {
            return vec![0.0];
        }
        let n = (range / step).round() as usize + 1;
        let start = -((n - 1) as f64) * step / 2.0;
        (0..n).map(|i| start + i as f64 * step).collect()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn axis_order(&self) -> &[Axis] {
        &self.axis_order
    }

    pub fn stage_positions(&self) -> &[StagePosition] {
        &self.stage_positions
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn z_offsets(&self) -> &[f64] {
        &self.z_offsets
    }

    pub fn time_loops(&self) -> usize {
        self.time_loops
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    pub fn with_stage_positions(&self, stage_positions: Vec<StagePosition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage_positions,
            ..self.clone()
        }
    }

    pub fn with_channels(&self, channels: Vec<Channel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channels,
            ..self.clone()
        }
    }

    pub fn with_time_loops(&self, time_loops: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            time_loops,
            ..self.clone()
        }
    }

    pub fn with_axis_order(&self, axis_order: Vec<Axis>) -> Self {
        Self {
            id: Uuid::new_v4(),
            axis_order,
            ..self.clone()
        }
    }

    /// Number of entries along `axis`; 0 when the plan does not iterate it.
    pub fn size(&self, axis: Axis) -> usize {
        match axis {
            Axis::P => self.stage_positions.len(),
            Axis::T => self.time_loops,
            Axis::C => self.channels.len(),
            Axis::Z => self.z_offsets.len(),
        }
    }

    /// Iterated axes and their sizes, in axis order. Axes of size 0 are omitted.
    pub fn sizes(&self) -> Vec<(Axis, usize)> {
        self.axis_order
            .iter()
            .map(|&axis| (axis, self.size(axis)))
            .filter(|&(_, size)| size > 0)
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.sizes().iter().map(|&(_, size)| size).product()
    }

    /// Checks that every axis appears exactly once in the axis order.
    pub fn validate(&self) -> Result<()> {
        for axis in Axis::ALL {
            let count = self.axis_order.iter().filter(|&&a| a == axis).count();
            if count != 1 {
                return Err(Error::Config(format!(
                    "axis {:?} appears {} times in the axis order",
                    axis, count
                )));
            }
        }
        Ok(())
    }

    /// Enumerates every event; the first axis in the axis order varies slowest.
    pub fn events(&self) -> Vec<AcquisitionEvent> {
        let sizes = self.sizes();
        if sizes.is_empty() {
            return vec![self.event_at(EventIndex::default())];
        }

        let total = self.event_count();
        let mut events = Vec::with_capacity(total);
        let mut counters = vec![0usize; sizes.len()];

        for _ in 0..total {
            let index = sizes
                .iter()
                .zip(&counters)
                .fold(EventIndex::default(), |index, (&(axis, _), &value)| {
                    index.with(axis, value)
                });
            events.push(self.event_at(index));

            for level in (0..sizes.len()).rev() {
                counters[level] += 1;
                if counters[level] < sizes[level].1 {
                    break;
                }
                counters[level] = 0;
            }
        }

        events
    }

    fn event_at(&self, index: EventIndex) -> AcquisitionEvent {
        let position = self
            .stage_positions
            .get(index.p)
            .copied()
            .unwrap_or_default();
        let z = match self.z_offsets.get(index.z) {
            Some(offset) => Some(position.z.unwrap_or(0.0) + offset),
            None => position.z,
        };

        let event = AcquisitionEvent::new(index)
            .with_stage(position.x, position.y, z)
            .with_plan(self.id);

        match self.channels.get(index.c) {
            Some(channel) => event.with_channel(channel.clone()),
            None => event,
        }
    }
}
