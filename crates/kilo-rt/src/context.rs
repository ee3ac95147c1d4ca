//! Execution context: the per-pass access point operators share.
//!
//! Owns the default scratch pool and the centralized error channel. The
//! scheduler creates one context before the first operator runs and passes it
//! `&mut` into every invocation — there is no global state.

use kilo_core::KiloError;

use crate::pool::ScratchPool;

/// Shared state for one inference session.
pub struct ExecutionContext {
    pool: ScratchPool,
    last_error: Option<KiloError>,
}

impl ExecutionContext {
    /// Create a context around an existing pool.
    pub fn new(pool: ScratchPool) -> Self {
        Self {
            pool,
            last_error: None,
        }
    }

    /// Create a context with a fresh pool of the given capacity.
    pub fn with_pool_capacity(bytes: usize) -> Self {
        Self::new(ScratchPool::with_capacity(bytes))
    }

    /// The default scratch allocator.
    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }

    /// The default scratch allocator, mutably.
    pub fn pool_mut(&mut self) -> &mut ScratchPool {
        &mut self.pool
    }

    /// Report an error through the central channel.
    ///
    /// Logs the error, records it as the pass's failure cause, and hands the
    /// value back so call sites read `return Err(ctx.fail(err))`. Errors
    /// abort the current inference pass; there is no local recovery.
    pub fn fail(&mut self, err: KiloError) -> KiloError {
        log::error!("operator failed: {err}");
        self.last_error = Some(err.clone());
        err
    }

    /// The most recent error reported this pass, if any.
    pub fn last_error(&self) -> Option<&KiloError> {
        self.last_error.as_ref()
    }

    /// Clear the recorded error (scheduler, between passes).
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}
