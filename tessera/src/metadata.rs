//! Sequence and frame metadata.
//!
//! Frame metadata is an open JSON object. Typed values stored inside it are
//! wrapped as `{"__type__": "<TypeName>", "data": {...}}` so a checkpoint
//! reader can restore them without knowing the key layout up front.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::event::{AcquisitionEvent, EventIndex};
use crate::plan::AcquisitionPlan;

pub const TYPE_KEY: &str = "__type__";
pub const DATA_KEY: &str = "data";

pub const CAMERA_DEVICE: &str = "camera_device";
pub const PIXEL_SIZE_UM: &str = "pixel_size_um";
pub const MDA_EVENT: &str = "mda_event";
pub const NEW_INDEX: &str = "new_index";

/// Camera label assumed when a frame carries no `camera_device` entry.
pub const DEFAULT_CAMERA: &str = "0";

const CAMERA_DEVICE_TYPE: &str = "CameraDevice";
const COMPOSITE_CAMERA_NAME: &str = "Multi Camera";

/// Types that can be embedded in frame metadata with a type tag.
pub trait TypeTag: Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
}

impl TypeTag for AcquisitionEvent {
    const TYPE_NAME: &'static str = "AcquisitionEvent";
}

impl TypeTag for AcquisitionPlan {
    const TYPE_NAME: &'static str = "AcquisitionPlan";
}

impl TypeTag for EventIndex {
    const TYPE_NAME: &'static str = "EventIndex";
}

/// Free-form metadata attached to a single frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameMetadata(Map<String, Value>);

impl FrameMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(camera: impl Into<String>) -> Self {
        let mut metadata = Self::new();
        metadata.insert(CAMERA_DEVICE, Value::String(camera.into()));
        metadata
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn camera_device(&self) -> Option<&str> {
        self.get_str(CAMERA_DEVICE)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert_typed<T: TypeTag>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let mut tagged = Map::new();
        tagged.insert(TYPE_KEY.to_string(), Value::String(T::TYPE_NAME.to_string()));
        tagged.insert(DATA_KEY.to_string(), serde_json::to_value(value)?);
        self.0.insert(key.into(), Value::Object(tagged));
        Ok(())
    }

    /// Decodes a tagged value. Missing keys yield `Ok(None)`; a present key
    /// with a different or absent tag is an error.
    pub fn get_typed<T: TypeTag>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };

        let mismatch = || Error::MetadataType {
            key: key.to_string(),
            expected: T::TYPE_NAME,
        };

        let tagged = value.as_object().ok_or_else(mismatch)?;
        if tagged.get(TYPE_KEY).and_then(Value::as_str) != Some(T::TYPE_NAME) {
            return Err(mismatch());
        }
        let data = tagged.get(DATA_KEY).cloned().ok_or_else(mismatch)?;

        Ok(Some(serde_json::from_value(data)?))
    }
}

/// Device entry reported by the hardware when a sequence starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub label: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Device {
    pub fn camera(label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            name: name.into(),
            kind: CAMERA_DEVICE_TYPE.to_string(),
        }
    }

    pub fn is_physical_camera(&self) -> bool {
        self.kind == CAMERA_DEVICE_TYPE && self.name != COMPOSITE_CAMERA_NAME
    }
}

/// Metadata delivered with `sequence_started`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryMetadata {
    pub devices: Vec<Device>,
    pub image_width: usize,
    pub image_height: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_size_um: Option<f64>,
}

impl SummaryMetadata {
    /// Labels of the physical cameras, in device order.
    pub fn camera_labels(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|device| device.is_physical_camera())
            .map(|device| device.label.clone())
            .collect()
    }
}
