//! Fire-and-forget hop to the embedder's UI thread.
//!
//! The engine never calls rehighlight or mutates panel state from the
//! worker directly; it posts a [`UiMessage`] and the embedder drains the
//! queue on its UI thread via [`crate::ScriptConfigManager::pump_ui`].
//! Posts tolerate engine shutdown: a dead queue drops messages silently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::types::ScriptId;

/// Work item for the UI thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiMessage {
	/// Re-run analysis for the file (configuration or reports changed).
	Rehighlight(ScriptId),
	/// User accepted the suggestion notification.
	ApplyPending(ScriptId),
	/// User dismissed the suggestion notification.
	DismissPending(ScriptId),
}

/// Receiving end of the UI queue, drained by the pump.
pub(crate) type UiReceiver = mpsc::UnboundedReceiver<UiMessage>;

/// Sender half with a liveness flag.
#[derive(Debug, Clone)]
pub(crate) struct UiQueue {
	tx: mpsc::UnboundedSender<UiMessage>,
	alive: Arc<AtomicBool>,
}

impl UiQueue {
	pub(crate) fn new() -> (Self, UiReceiver) {
		let (tx, rx) = mpsc::unbounded_channel();
		let queue = Self {
			tx,
			alive: Arc::new(AtomicBool::new(true)),
		};
		(queue, rx)
	}

	pub(crate) fn post(&self, message: UiMessage) {
		if !self.alive.load(Ordering::Acquire) {
			return;
		}
		if self.tx.send(message).is_err() {
			tracing::trace!(message = ?message, "ui.post: receiver gone");
		}
	}

	pub(crate) fn mark_dead(&self) {
		self.alive.store(false, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn post_after_mark_dead_is_dropped() {
		let (queue, mut rx) = UiQueue::new();
		queue.post(UiMessage::Rehighlight(ScriptId(1)));
		queue.mark_dead();
		queue.post(UiMessage::Rehighlight(ScriptId(2)));

		assert_eq!(rx.try_recv().ok(), Some(UiMessage::Rehighlight(ScriptId(1))));
		assert!(rx.try_recv().is_err());
	}
}
