use thiserror::Error;

/// Failure produced by a user-supplied callback (effect body, derive
/// function, `on_set` hook).
pub type DynError = Box<dyn std::error::Error + 'static>;

#[derive(Debug, Error)]
pub enum WriteError {
	#[error("write to signal `{name}` rejected by validator")]
	Rejected { name: &'static str },
}

#[derive(Debug, Error)]
pub enum ComputedError {
	#[error("computed `{name}` failed to evaluate: {cause}")]
	Derive { name: &'static str, cause: DynError },
	#[error("computed `{name}` has no value")]
	Unavailable { name: &'static str },
}
