//! Round configuration.
//!
//! One `Settings` value is built by the entry point and passed by reference
//! into each component. Nothing here queries hardware.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plan::AcquisitionPlan;

// =============================================================================
// Microscope
// =============================================================================

/// Names of the hardware configuration groups the round switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroscopeSettings {
    pub objective_group: String,
    /// Group that selects single or dual camera acquisition.
    pub camera_mode_group: String,
    /// Preset of `camera_mode_group` used for plans with dual camera channels.
    pub dual_camera_preset: String,
}

impl Default for MicroscopeSettings {
    fn default() -> Self {
        Self {
            objective_group: "Objective".to_string(),
            camera_mode_group: "Camera".to_string(),
            dual_camera_preset: "Multi Camera".to_string(),
        }
    }
}

// =============================================================================
// Scan
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub objective: String,
    pub plan: AcquisitionPlan,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            objective: "10x".to_string(),
            plan: AcquisitionPlan::default(),
        }
    }
}

// =============================================================================
// Analysis
// =============================================================================

/// Rotation and flips that align image axes with stage axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Orientation {
    /// Counter-clockwise rotation in degrees; a multiple of 90.
    pub rotation: i32,
    pub flipud: bool,
    pub fliplr: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserSettings {
    pub threshold: f32,
    /// Side of the square structuring element used for opening and closing.
    pub closing_kernel: usize,
    /// Channel config whose projections are analysed.
    pub channel: String,
    pub tile_size: usize,
    /// Side of the square erased at every internal tile seam intersection.
    pub seam_width: usize,
    /// Treat network output as a mask: threshold only, no seam or morphology pass.
    pub binary_mode: bool,
    /// Scan pixel size in microns.
    pub pixel_size_um: f64,
    pub orientation: Orientation,
    /// Wait between attempts to read the scan checkpoint.
    pub checkpoint_retry_ms: u64,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            closing_kernel: 3,
            channel: "Cy5".to_string(),
            tile_size: 256,
            seam_width: 9,
            binary_mode: false,
            pixel_size_um: 0.11315,
            orientation: Orientation::default(),
            checkpoint_retry_ms: 1000,
        }
    }
}

// =============================================================================
// Acquisition
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Margin kept between a detection and the edge of its imaging tile, in microns.
    pub min_border_distance: f64,
    /// Added to the z position at the time the plan is derived.
    pub z_offset: f64,
    pub x_offset: f64,
    pub y_offset: f64,
    /// Acquisition pixel size in microns.
    pub pixel_size_um: f64,
    pub objective: String,
    /// Anchor grid subdivisions per tile for the cover solver.
    pub cover_subdivisions: usize,
    /// Template whose stage positions are replaced by the solved tiles.
    pub plan: AcquisitionPlan,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            min_border_distance: 1.0,
            z_offset: 0.0,
            x_offset: 0.0,
            y_offset: 0.0,
            pixel_size_um: 0.065,
            objective: "60x".to_string(),
            cover_subdivisions: 1,
            plan: AcquisitionPlan::default(),
        }
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveSettings {
    pub save_dir: PathBuf,
    pub save_name: String,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("data"),
            save_name: "eda_000".to_string(),
        }
    }
}

/// Complete configuration of one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub microscope: MicroscopeSettings,
    pub scan: ScanSettings,
    pub analyser: AnalyserSettings,
    pub acquisition: AcquisitionSettings,
    pub save: SaveSettings,
}

impl Settings {
    /// Reads settings from a YAML or JSON file, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            common::serde::deserialize_for_path(&bytes, path).map_err(|source| Error::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = common::serde::serialize_for_path(self, path).map_err(|source| Error::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, bytes).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let analyser = &self.analyser;
        if analyser.tile_size == 0 {
            return Err(Error::Config("analyser.tile_size must be positive".to_string()));
        }
        if analyser.closing_kernel == 0 {
            return Err(Error::Config(
                "analyser.closing_kernel must be positive".to_string(),
            ));
        }
        if analyser.orientation.rotation % 90 != 0 {
            return Err(Error::Config(format!(
                "analyser.orientation.rotation must be a multiple of 90, got {}",
                analyser.orientation.rotation
            )));
        }
        if !(analyser.pixel_size_um > 0.0) {
            return Err(Error::Config(format!(
                "analyser.pixel_size_um must be positive, got {}",
                analyser.pixel_size_um
            )));
        }

        let acquisition = &self.acquisition;
        if !(acquisition.pixel_size_um > 0.0) {
            return Err(Error::Config(format!(
                "acquisition.pixel_size_um must be positive, got {}",
                acquisition.pixel_size_um
            )));
        }
        if acquisition.min_border_distance < 0.0 {
            return Err(Error::Config(format!(
                "acquisition.min_border_distance must not be negative, got {}",
                acquisition.min_border_distance
            )));
        }
        if acquisition.cover_subdivisions == 0 {
            return Err(Error::Config(
                "acquisition.cover_subdivisions must be positive".to_string(),
            ));
        }

        self.scan.plan.validate()?;
        acquisition.plan.validate()?;

        if self.save.save_name.is_empty() {
            return Err(Error::Config("save.save_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Directory holding every artifact of this round.
    pub fn round_dir(&self) -> PathBuf {
        self.save.save_dir.join(&self.save.save_name)
    }
}
