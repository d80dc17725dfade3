//! Bounded local event history with a live feed.

use std::collections::VecDeque;

use chrono::Local;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Number of lines kept in history.
pub const HISTORY_LINES: usize = 50;

/// Human-readable session event lines.
///
/// New listeners can take the retained history and then switch to live
/// updates, which is how log sinks attach after the session started.
pub struct EventLog {
    history: RwLock<VecDeque<String>>,
    sender: broadcast::Sender<String>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LINES)),
            sender,
        }
    }

    /// Append a line, prefixed with the local wall-clock time.
    ///
    /// Empty messages are ignored.
    pub fn push(&self, message: &str) {
        if message.is_empty() {
            return;
        }
        let line = format!("[{}] {message}", Local::now().format("%H:%M:%S"));
        let _ = self.sender.send(line.clone()); // live listeners

        let mut history = self.history.write();
        history.push_back(line);
        while history.len() > HISTORY_LINES {
            history.pop_front();
        }
    }

    /// The last `n` lines, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<String> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }

    pub fn clear(&self) {
        self.history.write().clear();
    }

    /// Get a receiver for live lines.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Stream that yields history first, then live lines.
    ///
    /// Lines dropped because a slow listener lagged are skipped.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, String> {
        let (history, rx) = {
            let history = self.history.read();
            (history.iter().cloned().collect::<Vec<_>>(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
