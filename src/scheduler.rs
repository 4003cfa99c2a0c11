use std::cell::RefCell;
use std::time::{Duration, Instant};

use fxhash::FxHashSet;

pub(crate) type Task = Box<dyn FnOnce()>;

const MAX_MICROTASK_PASSES: usize = 100;

/// Deadline after which queued idle work is picked up by `run_timers`,
/// so idle tasks still run on hosts that never report idle time.
const IDLE_FALLBACK: Duration = Duration::from_millis(50);

/// Deferred-execution strategy. `Immediate` runs callers synchronously;
/// the rest enqueue into the owning [`Scheduler`] and run when the host
/// pumps the matching queue.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Strategy {
	#[default]
	Immediate,
	Microtask,
	Timer,
	Frame,
	Idle,
}

struct Entry {
	key: u64,
	task: Task,
}

struct TimedEntry {
	key: u64,
	due: Instant,
	task: Task,
}

/// Host-pumped deferred executor with one key-deduplicated queue per
/// strategy. Scheduling an already-queued key is a no-op, so a callback
/// scheduled many times within one turn runs once.
pub struct Scheduler {
	microtasks: RefCell<Vec<Entry>>,
	microtask_keys: RefCell<FxHashSet<u64>>,
	timers: RefCell<Vec<TimedEntry>>,
	frames: RefCell<Vec<Entry>>,
	frame_keys: RefCell<FxHashSet<u64>>,
	idles: RefCell<Vec<TimedEntry>>,
}

impl Scheduler {
	pub(crate) fn new() -> Self {
		Scheduler {
			microtasks: RefCell::new(Vec::new()),
			microtask_keys: RefCell::new(FxHashSet::default()),
			timers: RefCell::new(Vec::new()),
			frames: RefCell::new(Vec::new()),
			frame_keys: RefCell::new(FxHashSet::default()),
			idles: RefCell::new(Vec::new()),
		}
	}

	pub(crate) fn schedule(&self, strategy: Strategy, key: u64, task: Task) {
		match strategy {
			Strategy::Immediate => task(),
			Strategy::Microtask => {
				if self.microtask_keys.borrow_mut().insert(key) {
					self.microtasks.borrow_mut().push(Entry { key, task });
				}
			}
			Strategy::Timer => self.schedule_after(key, Duration::ZERO, task),
			Strategy::Frame => {
				if self.frame_keys.borrow_mut().insert(key) {
					self.frames.borrow_mut().push(Entry { key, task });
				}
			}
			Strategy::Idle => {
				let mut idles = self.idles.borrow_mut();
				if !idles.iter().any(|e| e.key == key) {
					idles.push(TimedEntry {
						key,
						due: Instant::now() + IDLE_FALLBACK,
						task,
					});
				}
			}
		}
	}

	/// Timer entry point used by effect debouncing. Rescheduling an
	/// existing key replaces its entry, resetting the deadline.
	pub(crate) fn schedule_after(&self, key: u64, delay: Duration, task: Task) {
		let mut timers = self.timers.borrow_mut();
		timers.retain(|e| e.key != key);
		timers.push(TimedEntry {
			key,
			due: Instant::now() + delay,
			task,
		});
	}

	pub(crate) fn cancel(&self, key: u64) {
		if self.microtask_keys.borrow_mut().remove(&key) {
			self.microtasks.borrow_mut().retain(|e| e.key != key);
		}
		if self.frame_keys.borrow_mut().remove(&key) {
			self.frames.borrow_mut().retain(|e| e.key != key);
		}
		self.timers.borrow_mut().retain(|e| e.key != key);
		self.idles.borrow_mut().retain(|e| e.key != key);
	}

	/// Drain the microtask queue to a fixed point. Tasks queued while
	/// draining run in the same call, up to a pass cap.
	pub fn run_microtasks(&self) {
		let mut passes = 0;
		loop {
			let batch = std::mem::take(&mut *self.microtasks.borrow_mut());
			if batch.is_empty() {
				break;
			}
			passes += 1;
			if passes > MAX_MICROTASK_PASSES {
				tracing::warn!(
					"microtask queue did not settle after {MAX_MICROTASK_PASSES} passes; tasks remain queued"
				);
				*self.microtasks.borrow_mut() = batch;
				break;
			}
			{
				let mut keys = self.microtask_keys.borrow_mut();
				for entry in &batch {
					keys.remove(&entry.key);
				}
			}
			for entry in batch {
				(entry.task)();
			}
		}
	}

	/// Run timer entries whose deadline has passed, plus idle entries old
	/// enough to hit the timer fallback.
	pub fn run_timers(&self) {
		let now = Instant::now();
		for entry in Self::split_due(&self.timers, now) {
			(entry.task)();
		}
		for entry in Self::split_due(&self.idles, now) {
			(entry.task)();
		}
	}

	/// Drain one frame's worth of queued work. Tasks scheduled while the
	/// frame runs land in the next frame.
	pub fn run_frame(&self) {
		let batch = std::mem::take(&mut *self.frames.borrow_mut());
		{
			let mut keys = self.frame_keys.borrow_mut();
			for entry in &batch {
				keys.remove(&entry.key);
			}
		}
		for entry in batch {
			(entry.task)();
		}
	}

	/// Run queued idle tasks while `time_remaining` holds; the remainder
	/// stays queued for a later idle period (or the timer fallback).
	pub fn run_idle(&self, time_remaining: impl Fn() -> bool) {
		let mut rest = std::mem::take(&mut *self.idles.borrow_mut());
		while !rest.is_empty() && time_remaining() {
			let entry = rest.remove(0);
			(entry.task)();
		}
		let mut idles = self.idles.borrow_mut();
		rest.append(&mut idles);
		*idles = rest;
	}

	fn split_due(queue: &RefCell<Vec<TimedEntry>>, now: Instant) -> Vec<TimedEntry> {
		let entries = std::mem::take(&mut *queue.borrow_mut());
		let (due, rest): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.due <= now);
		let mut slot = queue.borrow_mut();
		let mut merged = rest;
		merged.append(&mut slot);
		*slot = merged;
		due
	}
}
