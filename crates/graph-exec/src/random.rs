//! Process-wide pseudo-random state and a scoped snapshot guard.
//!
//! Exporting a model may draw from random generators as a side effect of shape inference.
//! Callers must observe the same random state before and after an export, so the export
//! cache wraps every exporter call in a [`RandomStateGuard`] that captures all registered
//! sources on entry and restores them when dropped, including on early error returns.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;

static GLOBAL_RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

fn global() -> MutexGuard<'static, StdRng> {
    match GLOBAL_RNG.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Runs `f` with exclusive access to the process-wide generator.
pub fn with_global_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    f(&mut global())
}

/// Reseeds the process-wide generator.
pub fn manual_seed(seed: u64) {
    *global() = StdRng::seed_from_u64(seed);
}

/// A generator whose state can be captured and put back.
pub trait RandomStateSource: Send + Sync {
    fn name(&self) -> &str;

    fn capture(&self) -> Box<dyn Any + Send>;

    /// Restores a state previously produced by [`capture`](Self::capture) on the same source.
    fn restore(&self, state: Box<dyn Any + Send>);
}

/// The process-wide generator behind [`with_global_rng`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalRng;

impl RandomStateSource for GlobalRng {
    fn name(&self) -> &str {
        "global"
    }

    fn capture(&self) -> Box<dyn Any + Send> {
        Box::new(global().clone())
    }

    fn restore(&self, state: Box<dyn Any + Send>) {
        match state.downcast::<StdRng>() {
            Ok(rng) => *global() = *rng,
            Err(_) => tracing::warn!("ignoring foreign random state for the global generator"),
        }
    }
}

/// Captures every source on creation and restores them, in reverse order, on drop.
pub struct RandomStateGuard {
    saved: Vec<(Arc<dyn RandomStateSource>, Option<Box<dyn Any + Send>>)>,
}

impl RandomStateGuard {
    pub fn capture(sources: &[Arc<dyn RandomStateSource>]) -> Self {
        let saved = sources
            .iter()
            .map(|source| (Arc::clone(source), Some(source.capture())))
            .collect();
        RandomStateGuard { saved }
    }
}

impl Drop for RandomStateGuard {
    fn drop(&mut self) {
        for (source, state) in self.saved.iter_mut().rev() {
            if let Some(state) = state.take() {
                source.restore(state);
            }
        }
    }
}

#[cfg(test)]
pub(crate) static GLOBAL_RNG_TEST_LOCK: Mutex<()> = Mutex::new(());
