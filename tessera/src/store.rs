//! Tile-backed array store.
//!
//! A store is a directory holding `store.json` and one raw chunk file per
//! 2D frame. Chunks are named by their leading index joined with `.`
//! (`0.1.0`) and hold the frame's pixels row-major in little-endian order.
//! Chunks never written read back as zeros.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use common::Buffer2;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::EventIndex;
use crate::plan::{AcquisitionPlan, Axis};

pub const HEADER_FILE: &str = "store.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    U16,
    F32,
}

/// Pixel types a store can hold.
pub trait StorePixel: Pod + Default + Send + Sync {
    const DTYPE: Dtype;
}

impl StorePixel for u16 {
    const DTYPE: Dtype = Dtype::U16;
}

impl StorePixel for f32 {
    const DTYPE: Dtype = Dtype::F32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Read,
    Write,
}

/// Shape description saved as `store.json`.
///
/// `shape` lists the sizes of `dims` followed by frame height and width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub shape: Vec<usize>,
    pub dims: Vec<Axis>,
    pub dtype: Dtype,
}

impl StoreHeader {
    pub fn new(dims: &[(Axis, usize)], width: usize, height: usize, dtype: Dtype) -> Self {
        let mut shape: Vec<usize> = dims.iter().map(|&(_, size)| size).collect();
        shape.push(height);
        shape.push(width);
        Self {
            shape,
            dims: dims.iter().map(|&(axis, _)| axis).collect(),
            dtype,
        }
    }

    /// Header for the frames of `plan`, one chunk per event.
    pub fn for_plan(plan: &AcquisitionPlan, width: usize, height: usize, dtype: Dtype) -> Self {
        Self::new(&plan.sizes(), width, height, dtype)
    }

    pub fn leading_shape(&self) -> &[usize] {
        &self.shape[..self.dims.len()]
    }

    pub fn frame_height(&self) -> usize {
        self.shape[self.dims.len()]
    }

    pub fn frame_width(&self) -> usize {
        self.shape[self.dims.len() + 1]
    }

    pub fn frame_len(&self) -> usize {
        self.frame_width() * self.frame_height()
    }

    /// Leading index of the frame for `index`, in store dimension order.
    pub fn index_of(&self, index: &EventIndex) -> Vec<usize> {
        self.dims.iter().map(|&axis| index.get(axis)).collect()
    }

    fn check(&self, path: &Path) -> Result<()> {
        if self.shape.len() != self.dims.len() + 2 {
            return Err(Error::Config(format!(
                "store '{}' declares {} dims but a {}-d shape",
                path.display(),
                self.dims.len(),
                self.shape.len()
            )));
        }
        Ok(())
    }

    fn check_index(&self, index: &[usize]) -> Result<()> {
        let leading = self.leading_shape();
        let inside = index.len() == leading.len() && index.iter().zip(leading).all(|(i, n)| i < n);
        if !inside {
            return Err(Error::StoreIndex {
                index: index.to_vec(),
                shape: leading.to_vec(),
            });
        }
        Ok(())
    }
}

/// Storage for indexed 2D frames.
pub trait ArrayStore: Sized {
    fn create(path: &Path, header: StoreHeader) -> Result<Self>;

    fn open(path: &Path, mode: StoreMode) -> Result<Self>;

    fn header(&self) -> &StoreHeader;

    fn write_frame<T: StorePixel>(&self, index: &[usize], frame: &Buffer2<T>) -> Result<()>;

    fn read_frame<T: StorePixel>(&self, index: &[usize]) -> Result<Buffer2<T>>;
}

fn is_chunk_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Deletes chunk files left by an earlier store at `path`.
fn remove_chunks(path: &Path) -> Result<()> {
    let read_error = |source| Error::Read {
        path: path.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(path).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let is_chunk = entry.file_name().to_str().is_some_and(is_chunk_name);
        if is_chunk && entry.path().is_file() {
            std::fs::remove_file(entry.path()).map_err(|source| Error::Write {
                path: entry.path(),
                source,
            })?;
        }
    }
    Ok(())
}

/// Directory-backed store with one file per frame.
#[derive(Debug)]
pub struct ChunkStore {
    path: PathBuf,
    header: StoreHeader,
    mode: StoreMode,
}

impl ChunkStore {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn chunk_path(&self, index: &[usize]) -> PathBuf {
        let name = if index.is_empty() {
            "0".to_string()
        } else {
            index
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(".")
        };
        self.path.join(name)
    }

    fn check_dtype<T: StorePixel>(&self) -> Result<()> {
        if T::DTYPE != self.header.dtype {
            return Err(Error::StoreDtype {
                path: self.path.clone(),
                stored: format!("{:?}", self.header.dtype),
                requested: format!("{:?}", T::DTYPE),
            });
        }
        Ok(())
    }
}

impl ArrayStore for ChunkStore {
    fn create(path: &Path, header: StoreHeader) -> Result<Self> {
        header.check(path)?;
        std::fs::create_dir_all(path).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })?;

        remove_chunks(path)?;

        let header_path = path.join(HEADER_FILE);
        let bytes = common::serde::serialize_for_path(&header, &header_path).map_err(|source| {
            Error::Encode {
                path: header_path.clone(),
                source,
            }
        })?;
        std::fs::write(&header_path, bytes).map_err(|source| Error::Write {
            path: header_path,
            source,
        })?;

        tracing::debug!(path = %path.display(), shape = ?header.shape, "created store");

        Ok(Self {
            path: path.to_path_buf(),
            header,
            mode: StoreMode::Write,
        })
    }

    fn open(path: &Path, mode: StoreMode) -> Result<Self> {
        let header_path = path.join(HEADER_FILE);
        let bytes = std::fs::read(&header_path).map_err(|source| Error::Read {
            path: header_path.clone(),
            source,
        })?;
        let header: StoreHeader = common::serde::deserialize_for_path(&bytes, &header_path)
            .map_err(|source| Error::Decode {
                path: header_path,
                source,
            })?;
        header.check(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            header,
            mode,
        })
    }

    fn header(&self) -> &StoreHeader {
        &self.header
    }

    fn write_frame<T: StorePixel>(&self, index: &[usize], frame: &Buffer2<T>) -> Result<()> {
        if self.mode == StoreMode::Read {
            return Err(Error::ReadOnlyStore(self.path.clone()));
        }
        self.check_dtype::<T>()?;
        self.header.check_index(index)?;

        let expected = (self.header.frame_width(), self.header.frame_height());
        if frame.dimensions() != expected {
            return Err(Error::FrameShape {
                expected,
                actual: frame.dimensions(),
            });
        }

        let chunk_path = self.chunk_path(index);
        std::fs::write(&chunk_path, bytemuck::cast_slice::<T, u8>(frame.pixels())).map_err(
            |source| Error::Write {
                path: chunk_path,
                source,
            },
        )
    }

    fn read_frame<T: StorePixel>(&self, index: &[usize]) -> Result<Buffer2<T>> {
        self.check_dtype::<T>()?;
        self.header.check_index(index)?;

        let (width, height) = (self.header.frame_width(), self.header.frame_height());
        let chunk_path = self.chunk_path(index);

        let file = match File::open(&chunk_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Buffer2::new_default(width, height));
            }
            Err(source) => {
                return Err(Error::Read {
                    path: chunk_path,
                    source,
                });
            }
        };

        let expected = self.header.frame_len() * std::mem::size_of::<T>();
        if expected == 0 {
            return Ok(Buffer2::new_default(width, height));
        }

        // SAFETY: chunks are written whole by `write_frame` and are not
        // modified while a reader holds the mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| Error::Read {
            path: chunk_path.clone(),
            source,
        })?;
        if mmap.len() != expected {
            return Err(Error::ChunkSize {
                path: chunk_path,
                expected,
                actual: mmap.len(),
            });
        }

        let pixels: Vec<T> = bytemuck::pod_collect_to_vec(&mmap[..]);
        Ok(Buffer2::new(width, height, pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> StoreHeader {
        StoreHeader::new(&[(Axis::P, 2), (Axis::C, 3)], 4, 2, Dtype::U16)
    }

    #[test]
    fn header_splits_leading_and_frame_shape() {
        let header = header();
        assert_eq!(header.shape, vec![2, 3, 2, 4]);
        assert_eq!(header.leading_shape(), &[2, 3]);
        assert_eq!((header.frame_width(), header.frame_height()), (4, 2));

        let index = EventIndex { p: 1, c: 2, z: 5, t: 0 };
        assert_eq!(header.index_of(&index), vec![1, 2]);
    }

    #[test]
    fn frames_read_back_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.zarr");

        let frame = Buffer2::from_fn(4, 2, |x, y| (x + 10 * y) as u16);
        {
            let store = ChunkStore::create(&path, header()).unwrap();
            store.write_frame(&[1, 2], &frame).unwrap();
        }
        assert!(path.join("1.2").exists());

        let store = ChunkStore::open(&path, StoreMode::Read).unwrap();
        assert_eq!(store.header(), &header());
        assert_eq!(store.read_frame::<u16>(&[1, 2]).unwrap(), frame);
    }

    #[test]
    fn unwritten_chunks_are_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::create(dir.path(), header()).unwrap();
        let frame = store.read_frame::<u16>(&[0, 0]).unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert!(frame.pixels().iter().all(|&v| v == 0));
    }

    #[test]
    fn rejects_out_of_range_index_and_wrong_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::create(dir.path(), header()).unwrap();
        let frame = Buffer2::<u16>::new_default(4, 2);

        assert!(matches!(
            store.write_frame(&[2, 0], &frame),
            Err(Error::StoreIndex { .. })
        ));
        assert!(matches!(
            store.write_frame(&[0], &frame),
            Err(Error::StoreIndex { .. })
        ));
        assert!(matches!(
            store.read_frame::<f32>(&[0, 0]),
            Err(Error::StoreDtype { .. })
        ));
        assert!(matches!(
            store.write_frame(&[0, 0], &Buffer2::<u16>::new_default(2, 2)),
            Err(Error::FrameShape { .. })
        ));
    }

    #[test]
    fn read_mode_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        ChunkStore::create(dir.path(), header()).unwrap();
        let store = ChunkStore::open(dir.path(), StoreMode::Read).unwrap();
        assert!(matches!(
            store.write_frame(&[0, 0], &Buffer2::<u16>::new_default(4, 2)),
            Err(Error::ReadOnlyStore(_))
        ));
    }

    #[test]
    fn truncated_chunk_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::create(dir.path(), header()).unwrap();
        std::fs::write(dir.path().join("0.0"), [0u8; 3]).unwrap();
        assert!(matches!(
            store.read_frame::<u16>(&[0, 0]),
            Err(Error::ChunkSize { expected: 16, actual: 3, .. })
        ));
    }

    #[test]
    fn create_clears_previous_chunks_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::create(dir.path(), header()).unwrap();
        store
            .write_frame(&[0, 1], &Buffer2::new_filled(4, 2, 7u16))
            .unwrap();
        std::fs::write(dir.path().join("eda_seq.json"), "{}").unwrap();

        let store = ChunkStore::create(dir.path(), header()).unwrap();
        assert!(!dir.path().join("0.1").exists());
        assert!(dir.path().join("eda_seq.json").exists());
        assert!(store.read_frame::<u16>(&[0, 1]).unwrap().pixels().iter().all(|&v| v == 0));
    }

    #[test]
    fn chunk_names_are_dotted_digits() {
        assert!(is_chunk_name("0"));
        assert!(is_chunk_name("1.20.3"));
        assert!(!is_chunk_name("store.json"));
        assert!(!is_chunk_name("1..2"));
    }

    #[test]
    fn float_frames_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let header = StoreHeader::new(&[(Axis::P, 1)], 3, 1, Dtype::F32);
        let store = ChunkStore::create(dir.path(), header).unwrap();
        let frame = Buffer2::new(3, 1, vec![0.0f32, 0.5, 1.0]);
        store.write_frame(&[0], &frame).unwrap();
        assert_eq!(store.read_frame::<f32>(&[0]).unwrap(), frame);
    }
}
