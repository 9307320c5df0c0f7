//! Device runtime
//!
//! Every device runs as its own tokio task and owns its status. Observers
//! read published [`DeviceSnapshot`]s through a watch channel; control goes
//! through a [`CancellationToken`] (turn off) and a pause flag.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{DeviceConfig, SimulatorConfig};
use crate::radio::Transport;
use crate::sink::EventSink;

use super::{Device, DeviceSnapshot};

/// Keeps a device counted as running while alive
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: Transport, S: EventSink> Device<T, S> {
    /// Drive the device until `cancel` fires
    ///
    /// Activation runs once up front, then every send interval the device
    /// either retries activation or, once joined, settles its class and runs
    /// one exchange. Nothing is exchanged after cancellation and the device
    /// is handed back.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        paused: watch::Receiver<bool>,
        snapshots: watch::Sender<DeviceSnapshot>,
    ) -> Self {
        if cancel.is_cancelled() {
            self.print("Turn OFF");
            return self;
        }

        self.join();
        snapshots.send_replace(self.snapshot());

        let period = self.config.send_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.print("Turn OFF");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if *paused.borrow() {
                continue;
            }

            if self.status.joined {
                self.select_class();
                self.execute();
            } else {
                self.join();
            }
            snapshots.send_replace(self.snapshot());
        }

        snapshots.send_replace(self.snapshot());
        self
    }
}

/// Control side of a spawned device
pub struct DeviceHandle<T: Transport, S: EventSink> {
    id: u32,
    name: String,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    snapshot: watch::Receiver<DeviceSnapshot>,
    task: JoinHandle<Device<T, S>>,
}

impl<T: Transport, S: EventSink> DeviceHandle<T, S> {
    /// Spawn `device` on the current tokio runtime
    ///
    /// The device stops when `parent` or its own token is cancelled.
    /// `running` counts the device until its task ends.
    pub fn spawn(
        device: Device<T, S>,
        parent: &CancellationToken,
        running: Arc<AtomicUsize>,
    ) -> Self {
        let cancel = parent.child_token();
        let (paused_tx, paused_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(device.snapshot());
        let id = device.id();
        let name = device.name().to_string();

        let guard = RunningGuard::new(running);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            device.run(token, paused_rx, snapshot_tx).await
        });

        Self {
            id,
            name,
            cancel,
            paused: paused_tx,
            snapshot: snapshot_rx,
            task,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest published state
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Skip exchanges until resumed
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Ask the device to stop
    pub fn turn_off(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the device task and take the device back
    pub async fn join(self) -> Result<Device<T, S>, JoinError> {
        self.task.await
    }
}

/// Set of devices sharing one cancellation scope
pub struct Simulator<T: Transport, S: EventSink> {
    cancel: CancellationToken,
    running: Arc<AtomicUsize>,
    devices: Vec<DeviceHandle<T, S>>,
}

impl<T: Transport, S: EventSink> Default for Simulator<T, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport, S: EventSink> Simulator<T, S> {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicUsize::new(0)),
            devices: Vec::new(),
        }
    }

    /// Spawn one device per configuration entry
    ///
    /// `transport` builds the transport of each device; every device reports
    /// to a clone of `sink`.
    pub fn from_config<F>(config: &SimulatorConfig, mut transport: F, sink: S) -> Self
    where
        F: FnMut(&DeviceConfig) -> T,
        S: Clone,
    {
        let mut simulator = Self::new();
        for device in &config.devices {
            let link = transport(device);
            simulator.spawn(Device::new(device.clone(), link, sink.clone()));
        }
        log::info!("simulator started with {} device(s)", simulator.devices.len());
        simulator
    }

    /// Start a device
    pub fn spawn(&mut self, device: Device<T, S>) -> &DeviceHandle<T, S> {
        log::debug!("spawning device {} ({})", device.id(), device.name());
        let handle = DeviceHandle::spawn(device, &self.cancel, self.running.clone());
        self.devices.push(handle);
        &self.devices[self.devices.len() - 1]
    }

    pub fn devices(&self) -> &[DeviceHandle<T, S>] {
        &self.devices
    }

    pub fn device(&self, id: u32) -> Option<&DeviceHandle<T, S>> {
        self.devices.iter().find(|handle| handle.id() == id)
    }

    /// Devices whose task has not ended yet
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared counter behind [`Simulator::running`]
    pub fn running_counter(&self) -> Arc<AtomicUsize> {
        self.running.clone()
    }

    /// Turn every device off and wait for them
    pub async fn shutdown(self) -> Vec<Device<T, S>> {
        log::info!("stopping {} device(s)", self.devices.len());
        self.cancel.cancel();

        let mut stopped = Vec::with_capacity(self.devices.len());
        for handle in self.devices {
            let name = handle.name().to_string();
            match handle.join().await {
                Ok(device) => stopped.push(device),
                Err(err) => log::error!("device {} task failed: {}", name, err),
            }
        }
        stopped
    }
}
