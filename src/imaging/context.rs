//! Shared render resources.
//!
//! A [`RenderContext`] owns the backend and a dedicated rayon pool. The
//! composition root builds exactly one and hands out `Arc` clones; sessions
//! and pipelines never create their own. Every backend call goes through
//! [`render`](RenderContext::render), which takes the render-queue lock before
//! installing the pool, so a full-resolution commit on a worker thread and an
//! interactive preview interleave stage by stage instead of competing for
//! the same cores.

use super::backend::RenderBackend;
use super::cpu_backend::CpuBackend;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Failed to build render thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub struct RenderContext {
    backend: Box<dyn RenderBackend>,
    pool: rayon::ThreadPool,
    queue: Mutex<()>,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    /// CPU backend on a pool of `threads` workers.
    pub fn new(threads: usize) -> Result<Self, ContextError> {
        Self::with_backend(Box::new(CpuBackend::new()), threads)
    }

    pub fn with_backend(
        backend: Box<dyn RenderBackend>,
        threads: usize,
    ) -> Result<Self, ContextError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("darkroom-render-{i}"))
            .build()?;
        tracing::debug!(threads = pool.current_num_threads(), "render context ready");
        Ok(Self {
            backend,
            pool,
            queue: Mutex::new(()),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` against the backend on the render pool, one caller at a time.
    pub fn render<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&dyn RenderBackend) -> R + Send,
        R: Send,
    {
        // a panicked render leaves no state behind the lock
        let _guard = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let backend = self.backend.as_ref();
        self.pool.install(|| f(backend))
    }
}
