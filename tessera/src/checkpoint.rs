//! On-disk layout of a round and the checkpoints written at phase boundaries.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::assembler::QueuedFrame;
use crate::error::{Error, Result};
use crate::event::AcquisitionEvent;
use crate::metadata::FrameMetadata;

pub const STORE_EXTENSION: &str = "zarr";

/// Paths of every artifact of one round, rooted at `<save_dir>/<save_name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundDir {
    root: PathBuf,
}

impl RoundDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scan_store(&self) -> PathBuf {
        self.root.join(format!("scan.{STORE_EXTENSION}"))
    }

    pub fn network_store(&self) -> PathBuf {
        self.root.join(format!("network.{STORE_EXTENSION}"))
    }

    pub fn acquisition_store(&self) -> PathBuf {
        self.root.join(format!("acquisition.{STORE_EXTENSION}"))
    }

    pub fn scan_plan(&self) -> PathBuf {
        self.scan_store().join("eda_seq.json")
    }

    pub fn analyser_events(&self) -> PathBuf {
        self.scan_store().join("analyser_events.json")
    }

    pub fn analyser_metadatas(&self) -> PathBuf {
        self.scan_store().join("analyser_metadatas.json")
    }

    pub fn positions_csv(&self) -> PathBuf {
        self.root.join("positions.csv")
    }

    pub fn imaging_positions_csv(&self) -> PathBuf {
        self.root.join("imaging_positions.csv")
    }

    pub fn imaging_sequence(&self) -> PathBuf {
        self.root.join("imaging_sequence.json")
    }

    pub fn acquisition_plan(&self) -> PathBuf {
        self.acquisition_store().join("eda_seq.json")
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings.yaml")
    }
}

/// Writes `value` as pretty JSON, creating parent directories.
///
/// The bytes go to a sibling `.tmp` file first and are renamed into place,
/// so a concurrent reader sees either the old or the new content.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| Error::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let bytes = common::serde::serialize(value, common::SerdeFormat::Json).map_err(|source| {
        Error::Encode {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let staging = staging_path(path);
    std::fs::write(&staging, bytes).map_err(|source| Error::Write {
        path: staging.clone(),
        source,
    })?;
    std::fs::rename(&staging, path).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    common::serde::deserialize(&bytes, common::SerdeFormat::Json).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes the detection queue as parallel event and metadata lists.
pub fn save_queue(dir: &RoundDir, frames: &[QueuedFrame]) -> Result<()> {
    let events: Vec<&AcquisitionEvent> = frames.iter().map(|f| &f.event).collect();
    let metadatas: Vec<&FrameMetadata> = frames.iter().map(|f| &f.metadata).collect();

    // Metadata first: a reader polls for the events file.
    write_json(&dir.analyser_metadatas(), &metadatas)?;
    write_json(&dir.analyser_events(), &events)?;

    tracing::info!(
        frames = frames.len(),
        path = %dir.analyser_events().display(),
        "wrote analysis checkpoint"
    );
    Ok(())
}

/// Reads the detection queue written by `save_queue`.
///
/// Blocks until the events file exists, checking every `retry`. Any other
/// read or decode failure is returned.
pub fn load_queue(dir: &RoundDir, retry: Duration) -> Result<Vec<QueuedFrame>> {
    let events_path = dir.analyser_events();
    let events: Vec<AcquisitionEvent> = loop {
        match read_json(&events_path) {
            Ok(events) => break events,
            Err(Error::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    path = %events_path.display(),
                    retry_ms = retry.as_millis() as u64,
                    "analysis checkpoint not written yet, retrying"
                );
                std::thread::sleep(retry);
            }
            Err(err) => return Err(err),
        }
    };

    let metadatas: Vec<FrameMetadata> = read_json(&dir.analyser_metadatas())?;
    if metadatas.len() != events.len() {
        return Err(Error::CheckpointMismatch {
            events: events.len(),
            metadatas: metadatas.len(),
        });
    }

    Ok(events
        .into_iter()
        .zip(metadatas)
        .map(|(event, metadata)| QueuedFrame { event, metadata })
        .collect())
}
