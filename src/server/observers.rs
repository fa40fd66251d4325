//! Connected observers and broadcast fan-out.
//!
//! Each observer owns a bounded outbound queue drained by its connection's
//! writer task. Broadcasting never awaits: a full queue loses that frame for
//! that observer only, a closed queue marks the observer for eviction once
//! the pass is over.

use super::protocol::Envelope;
use crate::animation::{BlendFrame, BlendHandle, FrameOutput};
use crate::tts::{LipSyncConfig, LipSyncSmoother, LipSyncTarget};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub evicted: usize,
}

#[derive(Clone)]
pub struct ObserverSet {
    observers: Arc<Mutex<HashMap<Uuid, mpsc::Sender<Frame>>>>,
    queue: usize,
}

impl ObserverSet {
    pub fn new(queue: usize) -> Self {
        Self {
            observers: Arc::new(Mutex::new(HashMap::new())),
            queue: queue.max(1),
        }
    }

    /// Add an observer. The receiver is the connection's outbound queue.
    pub fn register(&self) -> (Uuid, mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.queue);
        let id = Uuid::new_v4();
        if let Ok(mut observers) = self.observers.lock() {
            observers.insert(id, tx.clone());
        }
        tracing::info!(observer = %id, total = self.len(), "observer connected");
        (id, tx, rx)
    }

    pub fn remove(&self, id: &Uuid) {
        let removed = self
            .observers
            .lock()
            .map(|mut observers| observers.remove(id).is_some())
            .unwrap_or(false);
        if removed {
            tracing::info!(observer = %id, total = self.len(), "observer disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.observers.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `envelope` to every observer. The frame is serialized once.
    pub fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let frame: Frame = Arc::from(envelope.to_text());
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        let Ok(mut observers) = self.observers.lock() else {
            return report;
        };
        for (id, tx) in observers.iter() {
            match tx.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::debug!(observer = %id, kind = %envelope.kind, "observer queue full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in &closed {
            observers.remove(id);
            tracing::info!(observer = %id, "observer evicted after failed send");
        }
        report.evicted = closed.len();
        report
    }

    /// Drop every queue so writer tasks finish and connections close.
    pub fn close_all(&self) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.clear();
        }
    }
}

/// Publishes every blend tick as a `parameters` broadcast.
pub struct FrameBroadcaster {
    observers: ObserverSet,
}

impl FrameBroadcaster {
    pub fn new(observers: ObserverSet) -> Self {
        Self { observers }
    }
}

impl FrameOutput for FrameBroadcaster {
    fn publish(&self, frame: &Arc<BlendFrame>) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.broadcast(&Envelope::broadcast(
            "parameters",
            json!({ "tick": frame.tick, "params": frame.params }),
        ));
    }
}

/// Lip-sync sink for the speech service: drives the mouth parameter and
/// relays smoothed `lip_sync` frames to observers.
pub struct LipSyncBroadcaster {
    blend: BlendHandle,
    observers: ObserverSet,
    param_id: String,
    smoother: Mutex<LipSyncSmoother>,
}

impl LipSyncBroadcaster {
    pub fn new(config: &LipSyncConfig, blend: BlendHandle, observers: ObserverSet) -> Self {
        Self {
            blend,
            observers,
            param_id: config.param_id.clone(),
            smoother: Mutex::new(LipSyncSmoother::new(
                config.broadcast_smoothing,
                Duration::from_millis(config.min_broadcast_interval_ms),
            )),
        }
    }

    fn emit(&self, raw: f32, force: bool) {
        self.blend.set_target(self.param_id.as_str(), raw);
        let (value, smoothing) = match self.smoother.lock() {
            Ok(mut smoother) => match smoother.push(raw, tokio::time::Instant::now(), force) {
                Some(value) => (value, smoother.smoothing()),
                None => return,
            },
            Err(_) => return,
        };
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.observers.broadcast(&Envelope::broadcast(
            "lip_sync",
            json!({
                "param_id": self.param_id,
                "value": value,
                "raw_value": raw,
                "timestamp": timestamp,
                "smoothing": smoothing,
            }),
        ));
    }
}

impl LipSyncTarget for LipSyncBroadcaster {
    fn frame(&self, openness: f32) {
        self.emit(openness, false);
    }

    fn close(&self) {
        self.emit(0.0, true);
    }
}
