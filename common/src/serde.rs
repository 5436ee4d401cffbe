use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::file_format::{FileExtensionError, SerdeFormat};

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Extension(#[from] FileExtensionError),
}

pub type Result<T> = std::result::Result<T, SerdeFormatError>;

pub fn is_false(value: &bool) -> bool {
    !*value
}

pub fn serialize<T: Serialize>(value: &T, format: SerdeFormat) -> Result<Vec<u8>> {
    let mut text = match format {
        SerdeFormat::Yaml => serde_yml::to_string(value)?,
        SerdeFormat::Json => serde_json::to_string_pretty(value)?,
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text.into_bytes())
}

pub fn deserialize<T: DeserializeOwned>(serialized: &[u8], format: SerdeFormat) -> Result<T> {
    let text = std::str::from_utf8(serialized)?;
    match format {
        SerdeFormat::Yaml => Ok(serde_yml::from_str(text)?),
        SerdeFormat::Json => Ok(serde_json::from_str(text)?),
    }
}

/// Serializes `value` in the format implied by the extension of `path`.
pub fn serialize_for_path<T: Serialize>(value: &T, path: &Path) -> Result<Vec<u8>> {
    serialize(value, SerdeFormat::from_path(path)?)
}

/// Deserializes `serialized` in the format implied by the extension of `path`.
pub fn deserialize_for_path<T: DeserializeOwned>(serialized: &[u8], path: &Path) -> Result<T> {
    deserialize(serialized, SerdeFormat::from_path(path)?)
}
