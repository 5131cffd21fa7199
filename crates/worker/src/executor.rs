use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::queue::SetQueue;
use crate::spawn::spawn_named_thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Inner<K> {
	state: Mutex<SetQueue<K, Task>>,
	/// Signaled when a task is enqueued or shutdown is requested.
	work: Condvar,
	/// Signaled when the queue transitions to idle (empty, nothing running).
	idle: Condvar,
	shutdown: AtomicBool,
}

/// Single-worker FIFO executor with set-queue semantics.
///
/// At most one task per key is queued and at most one is running at any
/// time (the queue key-set spans both). Tasks run on one dedicated OS
/// thread in FIFO order of first acceptance; a panicking task is caught
/// and logged without poisoning the worker.
pub struct BackgroundExecutor<K: Copy + Eq + Hash + Send + fmt::Debug + 'static> {
	inner: Arc<Inner<K>>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: Copy + Eq + Hash + Send + fmt::Debug + 'static> BackgroundExecutor<K> {
	/// Creates the executor and spawns its worker thread.
	pub fn new(thread_name: &str) -> Self {
		let inner = Arc::new(Inner {
			state: Mutex::new(SetQueue::new()),
			work: Condvar::new(),
			idle: Condvar::new(),
			shutdown: AtomicBool::new(false),
		});

		let worker_inner = Arc::clone(&inner);
		let worker = spawn_named_thread(thread_name, move || run_worker(worker_inner))
			.expect("failed to spawn background executor thread");

		Self {
			inner,
			worker: Mutex::new(Some(worker)),
		}
	}

	/// Enqueues `task` unless a task for `key` is already queued or
	/// running. Returns whether the task was accepted. Never blocks beyond
	/// the queue lock.
	pub fn ensure_scheduled(&self, key: K, task: impl FnOnce() + Send + 'static) -> bool {
		if self.inner.shutdown.load(Ordering::Acquire) {
			return false;
		}
		let offer = self.inner.state.lock().offer(key, Box::new(task));
		tracing::trace!(key = ?key, offer = ?offer, "executor.ensure_scheduled");
		if offer.accepted() {
			self.inner.work.notify_one();
		}
		offer.accepted()
	}

	/// Removes a queued (not yet running) task for `key`.
	pub fn cancel_queued(&self, key: K) -> bool {
		self.inner.state.lock().remove_queued(key)
	}

	/// Blocks until the queue is empty and no task is running.
	pub fn drain(&self) {
		let mut state = self.inner.state.lock();
		while !state.is_idle() {
			self.inner.idle.wait(&mut state);
		}
	}

	/// True when a task for `key` is queued or running.
	pub fn is_scheduled(&self, key: K) -> bool {
		let state = self.inner.state.lock();
		state.is_queued(key) || state.is_running(key)
	}

	/// Stops the worker: queued tasks are discarded, the running task (if
	/// any) completes. Idempotent.
	pub fn shutdown(&self) {
		self.inner.shutdown.store(true, Ordering::Release);
		self.inner.work.notify_one();
		let handle = self.worker.lock().take();
		if let Some(handle) = handle {
			let _ = handle.join();
		}
	}
}

impl<K: Copy + Eq + Hash + Send + fmt::Debug + 'static> Drop for BackgroundExecutor<K> {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn run_worker<K: Copy + Eq + Hash + Send + fmt::Debug + 'static>(inner: Arc<Inner<K>>) {
	loop {
		let (key, task) = {
			let mut state = inner.state.lock();
			loop {
				if inner.shutdown.load(Ordering::Acquire) {
					state.clear_queued();
					inner.idle.notify_all();
					return;
				}
				if let Some(entry) = state.pop() {
					break entry;
				}
				inner.idle.notify_all();
				inner.work.wait(&mut state);
			}
		};

		if catch_unwind(AssertUnwindSafe(task)).is_err() {
			tracing::warn!(key = ?key, "executor.run: task panicked");
		}

		let mut state = inner.state.lock();
		state.finish(key);
		if state.is_idle() {
			inner.idle.notify_all();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;
	use std::time::Duration;

	use super::*;

	#[test]
	fn runs_tasks_in_fifo_order() {
		let executor = BackgroundExecutor::new("test-exec");
		let order = Arc::new(Mutex::new(Vec::new()));

		for key in 0..4u64 {
			let order = Arc::clone(&order);
			executor.ensure_scheduled(key, move || order.lock().push(key));
		}
		executor.drain();

		assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
	}

	#[test]
	fn dedups_queued_key() {
		let executor = BackgroundExecutor::new("test-exec");
		let runs = Arc::new(AtomicUsize::new(0));

		// Park the worker so subsequent offers land while key 1 is queued.
		let gate = Arc::new((Mutex::new(false), Condvar::new()));
		let worker_gate = Arc::clone(&gate);
		executor.ensure_scheduled(0u64, move || {
			let (lock, cv) = &*worker_gate;
			let mut open = lock.lock();
			while !*open {
				cv.wait(&mut open);
			}
		});

		for _ in 0..5 {
			let runs = Arc::clone(&runs);
			executor.ensure_scheduled(1u64, move || {
				runs.fetch_add(1, Ordering::SeqCst);
			});
		}

		let (lock, cv) = &*gate;
		*lock.lock() = true;
		cv.notify_all();
		executor.drain();

		assert_eq!(runs.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn running_key_is_not_reenqueued() {
		let executor = BackgroundExecutor::new("test-exec");
		let entered = Arc::new((Mutex::new(false), Condvar::new()));
		let release = Arc::new((Mutex::new(false), Condvar::new()));
		let runs = Arc::new(AtomicUsize::new(0));

		let (entered2, release2, runs2) = (Arc::clone(&entered), Arc::clone(&release), Arc::clone(&runs));
		executor.ensure_scheduled(7u64, move || {
			runs2.fetch_add(1, Ordering::SeqCst);
			let (lock, cv) = &*entered2;
			*lock.lock() = true;
			cv.notify_all();
			let (lock, cv) = &*release2;
			let mut open = lock.lock();
			while !*open {
				cv.wait(&mut open);
			}
		});

		// Wait for the task to start running.
		{
			let (lock, cv) = &*entered;
			let mut started = lock.lock();
			while !*started {
				cv.wait(&mut started);
			}
		}

		assert!(executor.is_scheduled(7u64));
		let runs3 = Arc::clone(&runs);
		let accepted = executor.ensure_scheduled(7u64, move || {
			runs3.fetch_add(1, Ordering::SeqCst);
		});
		assert!(!accepted, "running key must be dropped");

		let (lock, cv) = &*release;
		*lock.lock() = true;
		cv.notify_all();
		executor.drain();

		assert_eq!(runs.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn panicking_task_does_not_poison_worker() {
		let executor = BackgroundExecutor::new("test-exec");
		let ran = Arc::new(AtomicBool::new(false));

		executor.ensure_scheduled(1u64, || panic!("boom"));
		let ran2 = Arc::clone(&ran);
		executor.ensure_scheduled(2u64, move || ran2.store(true, Ordering::SeqCst));
		executor.drain();

		assert!(ran.load(Ordering::SeqCst));
		// The panicked key is schedulable again.
		assert!(executor.ensure_scheduled(1u64, || {}));
		executor.drain();
	}

	#[test]
	fn drain_waits_for_running_task() {
		let executor = Arc::new(BackgroundExecutor::new("test-exec"));
		let done = Arc::new(AtomicBool::new(false));

		let done2 = Arc::clone(&done);
		executor.ensure_scheduled(1u64, move || {
			std::thread::sleep(Duration::from_millis(30));
			done2.store(true, Ordering::SeqCst);
		});
		executor.drain();

		assert!(done.load(Ordering::SeqCst), "drain returned before the running task finished");
	}

	#[test]
	fn cancel_queued_skips_the_task() {
		let executor = BackgroundExecutor::new("test-exec");
		let gate = Arc::new((Mutex::new(false), Condvar::new()));
		let ran = Arc::new(AtomicBool::new(false));

		let worker_gate = Arc::clone(&gate);
		executor.ensure_scheduled(0u64, move || {
			let (lock, cv) = &*worker_gate;
			let mut open = lock.lock();
			while !*open {
				cv.wait(&mut open);
			}
		});
		let ran2 = Arc::clone(&ran);
		executor.ensure_scheduled(1u64, move || ran2.store(true, Ordering::SeqCst));

		assert!(executor.cancel_queued(1u64));

		let (lock, cv) = &*gate;
		*lock.lock() = true;
		cv.notify_all();
		executor.drain();

		assert!(!ran.load(Ordering::SeqCst));
	}
}
