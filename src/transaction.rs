//! Bookkeeping for a single load transaction: the stage it has reached and
//! the cooperative cancellation shared with external tool invocations.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stages pass strictly in declaration order; a failure in any of them ends
/// the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Staged,
    GeneratedSource,
    Built,
    Loaded,
    Validated,
    Committed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Staged => "staging",
            Stage::GeneratedSource => "generating source",
            Stage::Built => "building",
            Stage::Loaded => "loading",
            Stage::Validated => "validating",
            Stage::Committed => "committing",
        };
        f.write_str(name)
    }
}

/// Cancellation token shared with running tool invocations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self(Arc::new(AtomicBool::new(false))) }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }
}
