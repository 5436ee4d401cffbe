//! Hardware seam: the acquisition event stream and stage/config commands.

mod simulated;

pub use simulated::{SimObject, SimulatedMicroscope, SimulationConfig};

use std::sync::{Arc, Weak};

use common::Buffer2;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::AcquisitionEvent;
use crate::metadata::{FrameMetadata, SummaryMetadata};
use crate::plan::AcquisitionPlan;

/// Receiver of acquisition signals.
pub trait MdaListener: Send {
    fn sequence_started(
        &mut self,
        plan: &AcquisitionPlan,
        summary: &SummaryMetadata,
    ) -> Result<()>;

    fn frame_ready(
        &mut self,
        image: &Buffer2<u16>,
        event: &AcquisitionEvent,
        metadata: &FrameMetadata,
    ) -> Result<()>;

    fn sequence_finished(&mut self, plan: &AcquisitionPlan) -> Result<()>;

    fn sequence_cancelled(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type SharedListener = Arc<Mutex<dyn MdaListener>>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, SharedListener)>,
}

/// Fan-out of acquisition signals to subscribed listeners.
///
/// Listeners are called in subscription order on the emitting thread. The
/// registry lock is not held during a call, so listeners may disconnect
/// themselves or others.
#[derive(Clone, Default)]
pub struct HardwareEvents {
    registry: Arc<Mutex<Registry>>,
}

impl HardwareEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: SharedListener) -> Subscription {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, listener));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            connected: true,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    fn snapshot(&self) -> Vec<SharedListener> {
        self.registry
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub fn emit_sequence_started(
        &self,
        plan: &AcquisitionPlan,
        summary: &SummaryMetadata,
    ) -> Result<()> {
        for listener in self.snapshot() {
            listener.lock().sequence_started(plan, summary)?;
        }
        Ok(())
    }

    pub fn emit_frame_ready(
        &self,
        image: &Buffer2<u16>,
        event: &AcquisitionEvent,
        metadata: &FrameMetadata,
    ) -> Result<()> {
        for listener in self.snapshot() {
            listener.lock().frame_ready(image, event, metadata)?;
        }
        Ok(())
    }

    pub fn emit_sequence_finished(&self, plan: &AcquisitionPlan) -> Result<()> {
        for listener in self.snapshot() {
            listener.lock().sequence_finished(plan)?;
        }
        Ok(())
    }

    pub fn emit_sequence_cancelled(&self) -> Result<()> {
        for listener in self.snapshot() {
            listener.lock().sequence_cancelled()?;
        }
        Ok(())
    }
}

/// Handle of one subscribed listener. Dropping it disconnects the listener.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    connected: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Removes the listener. Fails with `NotConnected` when it was already
    /// removed or the event source is gone.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.connected = false;

        let registry = self.registry.upgrade().ok_or(Error::NotConnected)?;
        let mut registry = registry.lock();
        let position = registry
            .listeners
            .iter()
            .position(|(id, _)| *id == self.id)
            .ok_or(Error::NotConnected)?;
        registry.listeners.remove(position);
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.connected {
            let _ = self.disconnect();
        }
    }
}

/// Stage, optics and acquisition control.
pub trait Microscope: Send + Sync {
    fn events(&self) -> &HardwareEvents;

    fn xy_position(&self) -> (f64, f64);

    fn z_position(&self) -> f64;

    fn set_xy_position(&self, x: f64, y: f64) -> Result<()>;

    fn set_z_position(&self, z: f64) -> Result<()>;

    fn set_config(&self, group: &str, preset: &str) -> Result<()>;

    fn image_width(&self) -> usize;

    fn image_height(&self) -> usize;

    /// Starts `plan`. Implementations may block until the sequence ends or
    /// return right away; either way the end is signalled through `events()`.
    fn run_plan(&self, plan: &AcquisitionPlan) -> Result<()>;

    /// Requests the running sequence to stop. A running sequence then
    /// signals `sequence_cancelled`.
    fn cancel(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventIndex;

    #[derive(Default)]
    struct Counter {
        started: usize,
        frames: usize,
        finished: usize,
    }

    impl MdaListener for Counter {
        fn sequence_started(&mut self, _: &AcquisitionPlan, _: &SummaryMetadata) -> Result<()> {
            self.started += 1;
            Ok(())
        }

        fn frame_ready(
            &mut self,
            _: &Buffer2<u16>,
            _: &AcquisitionEvent,
            _: &FrameMetadata,
        ) -> Result<()> {
            self.frames += 1;
            Ok(())
        }

        fn sequence_finished(&mut self, _: &AcquisitionPlan) -> Result<()> {
            self.finished += 1;
            Ok(())
        }
    }

    fn emit_all(events: &HardwareEvents) {
        let plan = AcquisitionPlan::default();
        let image = Buffer2::new_default(2, 2);
        let event = AcquisitionEvent::new(EventIndex::default());
        events
            .emit_sequence_started(&plan, &SummaryMetadata::default())
            .unwrap();
        events
            .emit_frame_ready(&image, &event, &FrameMetadata::new())
            .unwrap();
        events.emit_sequence_finished(&plan).unwrap();
    }

    #[test]
    fn subscribed_listener_receives_every_signal() {
        let events = HardwareEvents::new();
        let counter = Arc::new(Mutex::new(Counter::default()));
        let _subscription = events.subscribe(counter.clone());

        emit_all(&events);

        let counter = counter.lock();
        assert_eq!((counter.started, counter.frames, counter.finished), (1, 1, 1));
    }

    #[test]
    fn dropping_the_subscription_disconnects() {
        let events = HardwareEvents::new();
        let counter = Arc::new(Mutex::new(Counter::default()));
        {
            let _subscription = events.subscribe(counter.clone());
            assert_eq!(events.listener_count(), 1);
        }
        assert_eq!(events.listener_count(), 0);

        emit_all(&events);
        assert_eq!(counter.lock().frames, 0);
    }

    #[test]
    fn second_disconnect_reports_not_connected() {
        let events = HardwareEvents::new();
        let mut subscription = events.subscribe(Arc::new(Mutex::new(Counter::default())));

        subscription.disconnect().unwrap();
        assert!(!subscription.is_connected());
        assert!(matches!(subscription.disconnect(), Err(Error::NotConnected)));
    }

    #[test]
    fn disconnect_after_source_dropped_reports_not_connected() {
        let events = HardwareEvents::new();
        let mut subscription = events.subscribe(Arc::new(Mutex::new(Counter::default())));
        drop(events);
        assert!(matches!(subscription.disconnect(), Err(Error::NotConnected)));
    }
}
