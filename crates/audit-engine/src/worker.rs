//! Worker boundary
//!
//! A worker is an opaque analysis unit: it receives the task descriptor and
//! eventually returns its findings, raises, or never returns. What it looks
//! for is none of the engine's business. Implementations are plugged in per
//! role through [`WorkerSet`].

use async_trait::async_trait;
use audit_core::{FindingRecord, TaskDescriptor, WorkerError, WorkerRole};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// One analysis capability
#[async_trait]
pub trait ReviewWorker: Send + Sync {
    /// Review `task` from the perspective of `role`
    async fn review(
        &self,
        role: WorkerRole,
        task: &TaskDescriptor,
    ) -> Result<Vec<FindingRecord>, WorkerError>;
}

/// Adapter turning an async closure into a worker
pub struct FnWorker<F> {
    f: F,
}

impl<F> FnWorker<F> {
    /// Wrap a closure
    #[inline]
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for FnWorker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnWorker")
    }
}

#[async_trait]
impl<F, Fut> ReviewWorker for FnWorker<F>
where
    F: Fn(WorkerRole, TaskDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<FindingRecord>, WorkerError>> + Send,
{
    async fn review(
        &self,
        role: WorkerRole,
        task: &TaskDescriptor,
    ) -> Result<Vec<FindingRecord>, WorkerError> {
        (self.f)(role, task.clone()).await
    }
}

/// Build a shareable worker from an async closure
pub fn worker_fn<F, Fut>(f: F) -> Arc<dyn ReviewWorker>
where
    F: Fn(WorkerRole, TaskDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<FindingRecord>, WorkerError>> + Send + 'static,
{
    Arc::new(FnWorker::new(f))
}

/// Stands in for a role nobody registered a worker for
struct Unregistered;

#[async_trait]
impl ReviewWorker for Unregistered {
    async fn review(
        &self,
        role: WorkerRole,
        _task: &TaskDescriptor,
    ) -> Result<Vec<FindingRecord>, WorkerError> {
        Err(WorkerError::Unregistered(role.to_string()))
    }
}

/// Role to worker mapping
///
/// Per-role registrations win over the fallback.
#[derive(Clone, Default)]
pub struct WorkerSet {
    by_role: BTreeMap<WorkerRole, Arc<dyn ReviewWorker>>,
    fallback: Option<Arc<dyn ReviewWorker>>,
}

impl std::fmt::Debug for WorkerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSet")
            .field("roles", &self.by_role.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl WorkerSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One worker serving every role
    #[inline]
    #[must_use]
    pub fn uniform(worker: Arc<dyn ReviewWorker>) -> Self {
        Self::new().with_fallback(worker)
    }

    /// Register a worker for one role
    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: WorkerRole, worker: Arc<dyn ReviewWorker>) -> Self {
        self.by_role.insert(role, worker);
        self
    }

    /// Worker for roles without their own registration
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, worker: Arc<dyn ReviewWorker>) -> Self {
        self.fallback = Some(worker);
        self
    }

    /// Check if `role` has a worker
    #[inline]
    #[must_use]
    pub fn covers(&self, role: WorkerRole) -> bool {
        self.by_role.contains_key(&role) || self.fallback.is_some()
    }

    /// Worker for `role`; roles without one get a worker that always fails
    #[must_use]
    pub fn resolve(&self, role: WorkerRole) -> Arc<dyn ReviewWorker> {
        self.by_role
            .get(&role)
            .or(self.fallback.as_ref())
            .map_or_else(|| Arc::new(Unregistered) as Arc<dyn ReviewWorker>, Arc::clone)
    }
}
