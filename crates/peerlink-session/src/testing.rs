//! In-memory stream link for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink_core::StreamLink;
use serde_json::Value;

/// Records what the session layer asks of the streaming connection.
#[derive(Default)]
pub struct RecordingLink {
    open: AtomicBool,
    closes: AtomicUsize,
    opened: Mutex<Vec<String>>,
    frames: Mutex<Vec<String>>,
}

impl RecordingLink {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }
}

#[async_trait]
impl StreamLink for RecordingLink {
    fn open(&self, session_id: &str) {
        self.opened.lock().push(session_id.to_string());
        self.set_open(true);
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.set_open(false);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_frame(&self, frame: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.frames.lock().push(frame);
        true
    }
}
