//! Optimistic-concurrency conflict handling for workflow saves.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- sending a draft with its known version and classifying
//!    the backend's answer as saved, conflicting or failed.
//! 2. **Dialog** -- the explicit state machine the user drives once a
//!    conflict has been detected.
//! 3. **Resolution** -- executing the chosen resolution against the backend.

pub mod detector;
pub mod dialog;
pub mod resolver;

pub use detector::{ConflictDetector, SaveOutcome};
pub use dialog::{Choice, ConflictDialog, DialogState, Resolution};
pub use resolver::{ConflictResolver, ResolverOutcome};
