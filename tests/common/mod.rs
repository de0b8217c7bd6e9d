#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use memwatch::memory::{MemorySnapshot, Sampler};
use memwatch::monitor::{EventKind, ListenerResult, MemoryListener, MonitorEvent};
use memwatch::{Error, Result};
use parking_lot::Mutex;

pub fn snapshot(ratio: f64) -> MemorySnapshot {
    let available = (ratio * 1000.0).round() as u64;
    MemorySnapshot::new(1000 - available, available, 1000)
}

/// Replays a list of ratios, fails with `Sampling` once a `None` is reached, then reports 50% forever
pub struct ScriptedSampler {
    steps: Mutex<VecDeque<Option<f64>>>,
}

impl ScriptedSampler {
    pub fn new(steps: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self { steps: Mutex::new(steps.into_iter().collect()) }
    }
}

impl Sampler for ScriptedSampler {
    fn measure(&self) -> Result<MemorySnapshot> {
        match self.steps.lock().pop_front() {
            Some(Some(ratio)) => Ok(snapshot(ratio)),
            Some(None) => Err(Error::sampling("scripted failure")),
            None => Ok(snapshot(0.5)),
        }
    }
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<EventKind>>,
}

impl RecordingListener {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|k| **k == kind).count()
    }
}

impl MemoryListener for RecordingListener {
    fn on_event(&self, event: &MonitorEvent) -> ListenerResult {
        self.events.lock().push(event.kind());
        Ok(())
    }
}

/// Polls `condition` until it holds or `timeout` elapses; returns the final result
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("memwatch-it-{}-{}", name, std::process::id()))
}
