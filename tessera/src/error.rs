//! Error types for the acquisition pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::plan::Axis;
use crate::sequencer::Phase;

/// Errors raised by the acquisition pipeline.
///
/// Configuration and shape errors are fatal. `NotConnected` is expected
/// during cancellation cleanup and is swallowed there.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: common::serde::SerdeFormatError,
    },

    #[error("Failed to encode '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: common::serde::SerdeFormatError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Frame received before the sequence started")]
    SequenceNotStarted,

    #[error(
        "Stack index (c={channel}, z={z}) is outside the allocated stack ({channels} channels, {z_slices} slices)"
    )]
    StackIndex {
        channel: usize,
        z: usize,
        channels: usize,
        z_slices: usize,
    },

    #[error("Frame is {actual:?} (w, h) but the stack expects {expected:?}")]
    FrameShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Camera device '{0}' is not one of the sequence cameras")]
    UnknownCamera(String),

    #[error("Dual camera channel '{config}' names no channel for camera {camera}")]
    DualChannel { config: String, camera: usize },

    #[error("Store index {index:?} is outside the store shape {shape:?}")]
    StoreIndex {
        index: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("Event has no index along store axis {0:?}")]
    StoreAxis(Axis),

    #[error("Store '{path}' holds {stored} pixels, requested {requested}")]
    StoreDtype {
        path: PathBuf,
        stored: String,
        requested: String,
    },

    #[error("Store '{0}' is open read-only")]
    ReadOnlyStore(PathBuf),

    #[error("Chunk '{path}' has {actual} bytes, expected {expected}")]
    ChunkSize {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("Image {width}x{height} does not split into {tile_size}px tiles")]
    TileShape {
        width: usize,
        height: usize,
        tile_size: usize,
    },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model returned {actual} images for a batch of {expected}")]
    BatchSize { expected: usize, actual: usize },

    #[error("Checkpoint lists {events} events but {metadatas} metadata entries")]
    CheckpointMismatch { events: usize, metadatas: usize },

    #[error("Metadata value could not be converted: {0}")]
    MetadataValue(#[from] serde_json::Error),

    #[error("Metadata entry '{key}' is not a tagged {expected}")]
    MetadataType { key: String, expected: &'static str },

    #[error("Tile cover is infeasible: point ({x}, {y}) lies under no candidate tile")]
    Infeasible { x: f64, y: f64 },

    #[error("Tile cover solver failed: {0}")]
    Solver(String),

    #[error("Listener is not connected")]
    NotConnected,

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Phase worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
