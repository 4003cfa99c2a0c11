pub mod macros;

mod batch;
mod computed;
mod context;
mod effect;
mod error;
mod link;
mod scheduler;
mod signal;
mod value;

use std::sync::atomic::{AtomicU64, Ordering};

pub use batch::{batch, in_batch};
pub use computed::{computed, computed_with, Computed, ComputedOptions};
pub use context::{default_context, untracked, with_context, Context};
pub use effect::{
	defer, effect, effect_with, on_cleanup, try_effect, try_effect_with, Effect, EffectOptions,
};
pub use error::{ComputedError, DynError, WriteError};
pub use scheduler::{Scheduler, Strategy};
pub use signal::{signal, signal_with, Signal, SignalOptions, Toggle};
pub use value::{Readable, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
	NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
