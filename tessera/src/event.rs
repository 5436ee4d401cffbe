//! Camera exposure events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::Axis;

/// Position of an event along every acquisition axis. Missing axes are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EventIndex {
    pub p: usize,
    pub t: usize,
    pub c: usize,
    pub z: usize,
}

impl EventIndex {
    pub fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::P => self.p,
            Axis::T => self.t,
            Axis::C => self.c,
            Axis::Z => self.z,
        }
    }

    pub fn with(mut self, axis: Axis, value: usize) -> Self {
        match axis {
            Axis::P => self.p = value,
            Axis::T => self.t = value,
            Axis::C => self.c = value,
            Axis::Z => self.z = value,
        }
        self
    }
}

/// Optical configuration preset used for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub group: String,
    pub config: String,
}

impl Channel {
    pub fn new(group: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            config: config.into(),
        }
    }
}

/// One camera exposure request. Values are never mutated; revised events
/// are derived with the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionEvent {
    #[serde(default)]
    index: EventIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x_pos: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y_pos: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    z_pos: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plan_id: Option<Uuid>,
}

impl AcquisitionEvent {
    pub fn new(index: EventIndex) -> Self {
        Self {
            index,
            channel: None,
            x_pos: None,
            y_pos: None,
            z_pos: None,
            plan_id: None,
        }
    }

    pub fn index(&self) -> EventIndex {
        self.index
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    /// Config name of the channel, if the event has one.
    pub fn channel_config(&self) -> Option<&str> {
        self.channel.as_ref().map(|c| c.config.as_str())
    }

    pub fn x_pos(&self) -> Option<f64> {
        self.x_pos
    }

    pub fn y_pos(&self) -> Option<f64> {
        self.y_pos
    }

    pub fn z_pos(&self) -> Option<f64> {
        self.z_pos
    }

    /// Id of the plan this event was enumerated from.
    pub fn plan_id(&self) -> Option<Uuid> {
        self.plan_id
    }

    pub fn with_index(&self, index: EventIndex) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    pub fn with_channel(&self, channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            ..self.clone()
        }
    }

    pub fn with_stage(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Self {
        Self {
            x_pos: x,
            y_pos: y,
            z_pos: z,
            ..self.clone()
        }
    }

    pub fn with_plan(&self, plan_id: Uuid) -> Self {
        Self {
            plan_id: Some(plan_id),
            ..self.clone()
        }
    }
}
