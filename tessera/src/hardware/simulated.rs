use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::Buffer2;
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::event::AcquisitionEvent;
use crate::metadata::{self, Device, FrameMetadata, SummaryMetadata};
use crate::plan::AcquisitionPlan;

use super::{HardwareEvents, Microscope};

/// Bright square placed on the simulated sample, in stage microns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimObject {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub size_um: f64,
    pub intensity: u16,
}

impl SimObject {
    pub fn new(x: f64, y: f64, size_um: f64) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            size_um,
            intensity: 4000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub image_width: usize,
    pub image_height: usize,
    pub pixel_size_um: f64,
    pub cameras: Vec<Device>,
    pub objects: Vec<SimObject>,
    /// Half width of the focus falloff in microns.
    pub focus_depth_um: f64,
    pub background: u16,
    /// Upper bound of the uniform noise added to every pixel.
    pub noise: u16,
    pub seed: u64,
    /// `set_config` fails for this preset.
    pub failing_preset: Option<String>,
    /// After this many events the sequence stalls until cancelled.
    pub hang_after: Option<usize>,
    /// `run_plan` returns right away and the sequence runs on its own thread.
    pub asynchronous: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            image_width: 512,
            image_height: 512,
            pixel_size_um: 0.11315,
            cameras: vec![Device::camera("Camera", "SimCamera")],
            objects: Vec::new(),
            focus_depth_um: 2.0,
            background: 0,
            noise: 0,
            seed: 0,
            failing_preset: None,
            hang_after: None,
            asynchronous: false,
        }
    }
}

impl SimulationConfig {
    pub fn dual_camera(mut self) -> Self {
        self.cameras = vec![
            Device::camera("Multi Camera", "Multi Camera"),
            Device::camera("Left", "SimCamera"),
            Device::camera("Right", "SimCamera"),
        ];
        self
    }
}

#[derive(Debug, Default)]
struct State {
    x: f64,
    y: f64,
    z: f64,
    configs: HashMap<String, String>,
    config_history: Vec<(String, String)>,
    cancel_requested: bool,
    hanging: bool,
    frames_emitted: usize,
    plans_run: usize,
}

struct Inner {
    config: SimulationConfig,
    events: HardwareEvents,
    state: Mutex<State>,
    wake: Condvar,
}

/// In-process microscope that renders synthetic frames.
///
/// Pixel `(column, row)` of a frame taken at stage `(sx, sy)` images stage
/// point `(row * ps + sx - w * ps / 2, column * ps + sy - h * ps / 2)`.
/// With dual cameras configured and a plan whose first channel is a dual
/// channel, every event yields one frame per camera; the second camera's
/// frames are mirrored vertically.
#[derive(Clone)]
pub struct SimulatedMicroscope {
    inner: Arc<Inner>,
}

impl SimulatedMicroscope {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                events: HardwareEvents::new(),
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn config_history(&self) -> Vec<(String, String)> {
        self.inner.state.lock().config_history.clone()
    }

    pub fn active_config(&self, group: &str) -> Option<String> {
        self.inner.state.lock().configs.get(group).cloned()
    }

    pub fn frames_emitted(&self) -> usize {
        self.inner.state.lock().frames_emitted
    }

    pub fn plans_run(&self) -> usize {
        self.inner.state.lock().plans_run
    }

    /// Blocks until a sequence stalls in hang mode. Returns false on timeout.
    pub fn wait_for_hang(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        if !state.hanging {
            let _ = self
                .inner
                .wake
                .wait_while_for(&mut state, |s| !s.hanging, timeout);
        }
        state.hanging
    }

    /// Renders the frame a camera would see at the given stage position.
    pub fn render(&self, x: f64, y: f64, z: f64) -> Buffer2<u16> {
        self.inner.render(x, y, z, &mut StdRng::seed_from_u64(self.inner.config.seed))
    }
}

impl Inner {
    fn summary(&self) -> SummaryMetadata {
        SummaryMetadata {
            devices: self.config.cameras.clone(),
            image_width: self.config.image_width,
            image_height: self.config.image_height,
            pixel_size_um: Some(self.config.pixel_size_um),
        }
    }

    fn render(&self, sx: f64, sy: f64, sz: f64, rng: &mut StdRng) -> Buffer2<u16> {
        let cfg = &self.config;
        let ps = cfg.pixel_size_um;
        let (w, h) = (cfg.image_width, cfg.image_height);
        let origin_x = sx - w as f64 * ps / 2.0;
        let origin_y = sy - h as f64 * ps / 2.0;

        Buffer2::from_fn(w, h, |col, row| {
            let gx = row as f64 * ps + origin_x;
            let gy = col as f64 * ps + origin_y;

            let mut value = cfg.background as f64;
            for object in &cfg.objects {
                let half = object.size_um / 2.0;
                if (gx - object.x).abs() <= half && (gy - object.y).abs() <= half {
                    let dz = (sz - object.z) / cfg.focus_depth_um.max(f64::EPSILON);
                    value += object.intensity as f64 / (1.0 + dz * dz);
                }
            }
            if cfg.noise > 0 {
                value += rng.random_range(0..=cfg.noise) as f64;
            }
            value.min(u16::MAX as f64) as u16
        })
    }

    fn cancelled(&self) -> bool {
        self.state.lock().cancel_requested
    }

    fn stall_until_cancelled(&self) {
        let mut state = self.state.lock();
        state.hanging = true;
        self.wake.notify_all();
        tracing::debug!("simulated sequence stalled until cancel");
        self.wake.wait_while(&mut state, |s| !s.cancel_requested);
        state.hanging = false;
    }

    fn run(&self, plan: &AcquisitionPlan) -> Result<()> {
        let dual = plan
            .channels()
            .first()
            .is_some_and(|c| c.config.contains("Dual"));
        let cameras: Vec<String> = if dual {
            self.summary().camera_labels()
        } else {
            self.summary().camera_labels().into_iter().take(1).collect()
        };

        self.state.lock().plans_run += 1;
        self.events.emit_sequence_started(plan, &self.summary())?;

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        for (i, event) in plan.events().iter().enumerate() {
            if self.config.hang_after == Some(i) {
                self.stall_until_cancelled();
            }
            if self.cancelled() {
                tracing::info!(frame = i, "simulated sequence cancelled");
                return self.events.emit_sequence_cancelled();
            }

            let (x, y, z) = self.move_to(event);
            let image = self.render(x, y, z, &mut rng);
            self.emit_frames(image, event, &cameras)?;
        }

        self.events.emit_sequence_finished(plan)
    }

    fn move_to(&self, event: &AcquisitionEvent) -> (f64, f64, f64) {
        let mut state = self.state.lock();
        if let Some(x) = event.x_pos() {
            state.x = x;
        }
        if let Some(y) = event.y_pos() {
            state.y = y;
        }
        if let Some(z) = event.z_pos() {
            state.z = z;
        }
        if let Some(channel) = event.channel() {
            state
                .configs
                .insert(channel.group.clone(), channel.config.clone());
        }
        (state.x, state.y, state.z)
    }

    fn emit_frames(
        &self,
        image: Buffer2<u16>,
        event: &AcquisitionEvent,
        cameras: &[String],
    ) -> Result<()> {
        let mut metadata = FrameMetadata::new();
        metadata.insert(
            metadata::PIXEL_SIZE_UM,
            serde_json::Value::from(self.config.pixel_size_um),
        );

        if cameras.len() < 2 {
            if let Some(camera) = cameras.first() {
                metadata.insert(metadata::CAMERA_DEVICE, serde_json::Value::from(camera.as_str()));
            }
            self.state.lock().frames_emitted += 1;
            return self.events.emit_frame_ready(&image, event, &metadata);
        }

        for (index, camera) in cameras.iter().enumerate() {
            let mut metadata = metadata.clone();
            metadata.insert(metadata::CAMERA_DEVICE, serde_json::Value::from(camera.as_str()));
            let frame = if index % 2 == 1 {
                image.flip_vertical()
            } else {
                image.clone()
            };
            self.state.lock().frames_emitted += 1;
            self.events.emit_frame_ready(&frame, event, &metadata)?;
        }
        Ok(())
    }
}

impl Microscope for SimulatedMicroscope {
    fn events(&self) -> &HardwareEvents {
        &self.inner.events
    }

    fn xy_position(&self) -> (f64, f64) {
        let state = self.inner.state.lock();
        (state.x, state.y)
    }

    fn z_position(&self) -> f64 {
        self.inner.state.lock().z
    }

    fn set_xy_position(&self, x: f64, y: f64) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.x = x;
        state.y = y;
        Ok(())
    }

    fn set_z_position(&self, z: f64) -> Result<()> {
        self.inner.state.lock().z = z;
        Ok(())
    }

    fn set_config(&self, group: &str, preset: &str) -> Result<()> {
        if self.inner.config.failing_preset.as_deref() == Some(preset) {
            return Err(Error::Hardware(format!(
                "preset '{}' of group '{}' failed to apply",
                preset, group
            )));
        }
        let mut state = self.inner.state.lock();
        state.configs.insert(group.to_string(), preset.to_string());
        state
            .config_history
            .push((group.to_string(), preset.to_string()));
        Ok(())
    }

    fn image_width(&self) -> usize {
        self.inner.config.image_width
    }

    fn image_height(&self) -> usize {
        self.inner.config.image_height
    }

    fn run_plan(&self, plan: &AcquisitionPlan) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            state.cancel_requested = false;
            state.hanging = false;
        }

        if !self.inner.config.asynchronous {
            return self.inner.run(plan);
        }

        let inner = Arc::clone(&self.inner);
        let plan = plan.clone();
        std::thread::spawn(move || {
            if let Err(err) = inner.run(&plan) {
                tracing::error!(plan_id = %plan.id(), "simulated sequence failed: {}", err);
            }
        });
        Ok(())
    }

    fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.cancel_requested = true;
        self.inner.wake.notify_all();
    }
}
