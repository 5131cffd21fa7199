use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Outcome of offering a task to a [`SetQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
	/// No task for this key was queued or running; the task was enqueued.
	Enqueued,
	/// A task for this key is already waiting in the queue.
	DuplicateQueued,
	/// A task for this key is currently being executed.
	DuplicateRunning,
}

impl Offer {
	/// True when the offered task was accepted into the queue.
	pub fn accepted(self) -> bool {
		matches!(self, Offer::Enqueued)
	}
}

/// FIFO queue that is also a set over keys.
///
/// A key is present in at most one of {queued, running}. Offering a task
/// for a present key is a no-op; tasks run in FIFO order of their first
/// accepted offer. Not internally synchronized; callers wrap it in a lock.
pub struct SetQueue<K, T> {
	queue: VecDeque<(K, T)>,
	queued: HashSet<K>,
	running: Option<K>,
}

impl<K: Copy + Eq + Hash + std::fmt::Debug, T> Default for SetQueue<K, T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: Copy + Eq + Hash + std::fmt::Debug, T> SetQueue<K, T> {
	pub fn new() -> Self {
		Self {
			queue: VecDeque::new(),
			queued: HashSet::new(),
			running: None,
		}
	}

	/// Offers a task for `key`, honoring key uniqueness across queued and
	/// running tasks.
	pub fn offer(&mut self, key: K, task: T) -> Offer {
		if self.running == Some(key) {
			return Offer::DuplicateRunning;
		}
		if !self.queued.insert(key) {
			return Offer::DuplicateQueued;
		}
		self.queue.push_back((key, task));
		Offer::Enqueued
	}

	/// Pops the oldest task and marks its key as running.
	///
	/// Panics if a task is already running; the single worker must call
	/// [`Self::finish`] before popping again.
	pub fn pop(&mut self) -> Option<(K, T)> {
		assert!(self.running.is_none(), "pop while a task is running");
		let (key, task) = self.queue.pop_front()?;
		self.queued.remove(&key);
		self.running = Some(key);
		Some((key, task))
	}

	/// Clears the running mark set by [`Self::pop`].
	pub fn finish(&mut self, key: K) {
		debug_assert_eq!(self.running, Some(key), "finish for a key that is not running");
		self.running = None;
	}

	/// Removes a queued (not running) task for `key`. Returns whether one
	/// was removed.
	pub fn remove_queued(&mut self, key: K) -> bool {
		if !self.queued.remove(&key) {
			return false;
		}
		self.queue.retain(|(k, _)| *k != key);
		true
	}

	/// Drops all queued tasks. The running mark, if any, is untouched.
	pub fn clear_queued(&mut self) {
		self.queue.clear();
		self.queued.clear();
	}

	pub fn len(&self) -> usize {
		self.queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	/// True when nothing is queued and nothing is running.
	pub fn is_idle(&self) -> bool {
		self.queue.is_empty() && self.running.is_none()
	}

	pub fn is_queued(&self, key: K) -> bool {
		self.queued.contains(&key)
	}

	pub fn is_running(&self, key: K) -> bool {
		self.running == Some(key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn offer_dedups_queued_keys() {
		let mut q = SetQueue::new();
		assert_eq!(q.offer(1u64, "a"), Offer::Enqueued);
		assert_eq!(q.offer(1, "b"), Offer::DuplicateQueued);
		assert_eq!(q.offer(2, "c"), Offer::Enqueued);
		assert_eq!(q.len(), 2);

		assert_eq!(q.pop(), Some((1, "a")));
	}

	#[test]
	fn offer_dedups_running_key() {
		let mut q = SetQueue::new();
		q.offer(1u64, "a");
		let (key, _) = q.pop().unwrap();
		assert_eq!(q.offer(key, "b"), Offer::DuplicateRunning);
		assert!(q.is_empty());

		q.finish(key);
		assert_eq!(q.offer(key, "c"), Offer::Enqueued);
	}

	#[test]
	fn pop_order_is_fifo_of_first_offer() {
		let mut q = SetQueue::new();
		q.offer(1u64, "a");
		q.offer(2, "b");
		q.offer(1, "ignored");
		q.offer(3, "c");

		let (k1, t1) = q.pop().unwrap();
		assert_eq!((k1, t1), (1, "a"));
		q.finish(k1);
		assert_eq!(q.pop().map(|(k, _)| k), Some(2));
		q.finish(2);
		assert_eq!(q.pop().map(|(k, _)| k), Some(3));
	}

	#[test]
	fn remove_queued_skips_running() {
		let mut q = SetQueue::new();
		q.offer(1u64, "a");
		q.offer(2, "b");
		let (k, _) = q.pop().unwrap();

		assert!(!q.remove_queued(k), "running task must not be removable");
		assert!(q.remove_queued(2));
		assert!(q.is_empty());
		assert!(!q.is_idle(), "still running");

		q.finish(k);
		assert!(q.is_idle());
	}

	// ── Model-based stress test ──

	struct Xorshift64(u64);

	impl Xorshift64 {
		fn next(&mut self) -> u64 {
			let mut x = self.0;
			x ^= x << 13;
			x ^= x >> 7;
			x ^= x << 17;
			self.0 = x;
			x
		}
	}

	/// Reference model: ordered key list with uniqueness over queued+running.
	#[derive(Default)]
	struct Model {
		order: Vec<u64>,
		running: Option<u64>,
	}

	impl Model {
		fn offer(&mut self, key: u64) -> bool {
			if self.running == Some(key) || self.order.contains(&key) {
				return false;
			}
			self.order.push(key);
			true
		}

		fn pop(&mut self) -> Option<u64> {
			if self.order.is_empty() {
				return None;
			}
			let key = self.order.remove(0);
			self.running = Some(key);
			Some(key)
		}
	}

	#[test]
	fn stress_matches_model() {
		let mut q: SetQueue<u64, u64> = SetQueue::new();
		let mut model = Model::default();
		let mut rng = Xorshift64(0xDEAD_BEEF);

		for i in 0..20_000u64 {
			match rng.next() % 10 {
				0..=5 => {
					let key = rng.next() % 8;
					let accepted = q.offer(key, i).accepted();
					assert_eq!(accepted, model.offer(key), "op {i}: offer {key}");
				}
				6..=8 => {
					if model.running.is_none() {
						let real = q.pop().map(|(k, _)| k);
						assert_eq!(real, model.pop(), "op {i}: pop");
					}
				}
				_ => {
					if let Some(key) = model.running.take() {
						q.finish(key);
					}
				}
			}
		}
	}
}
