//! The seam between the scheduler and the actual agent work.
//!
//! The pool has no knowledge of what an agent does. Callers supply an
//! `Invocable`: a single-operation capability that performs the work and
//! settles with a value on success or an error on failure. What the value
//! means is entirely up to the embedding application.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A unit of agent work.
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Perform the work once.
    async fn invoke(&self) -> Result<Value>;
}

/// Wraps a plain async closure as an [`Invocable`].
pub struct FnInvocable<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Invocable for FnInvocable<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn invoke(&self) -> Result<Value> {
        (self.f)().await
    }
}

/// Convenience constructor for closure-backed invocables.
pub fn invocable<F, Fut>(f: F) -> Arc<dyn Invocable>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnInvocable { f })
}
