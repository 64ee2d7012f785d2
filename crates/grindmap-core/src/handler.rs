//! Job handlers: the pluggable units of work the engine dispatches to.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Failure;

/// Executes one job attempt.
///
/// Handlers must fail loudly: an empty or partial result is an `Err`, never
/// an `Ok`. The returned [`Failure`] is classified by the engine to decide
/// whether the job is retried.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<Value, Failure>;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, payload: Value) -> Result<Value, Failure> {
        (**self).handle(payload).await
    }
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Failure>> + Send,
{
    async fn handle(&self, payload: Value) -> Result<Value, Failure> {
        (self.f)(payload).await
    }
}

/// Wrap a closure as a handler.
///
/// ```ignore
/// engine.register_handler("ping", handler_fn(|_| async { Ok(json!("pong")) }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Failure>> + Send,
{
    FnHandler { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_fn_passes_payload_through() {
        let handler = handler_fn(|payload: Value| async move {
            Ok(json!({"echo": payload["username"]}))
        });
        let out = handler.handle(json!({"username": "alice"})).await.unwrap();
        assert_eq!(out, json!({"echo": "alice"}));
    }

    #[tokio::test]
    async fn test_arc_handler_delegates() {
        let handler: Arc<dyn JobHandler> =
            Arc::new(handler_fn(|_| async { Err(Failure::http(404, "User not found")) }));
        let err = handler.handle(json!({})).await.unwrap_err();
        assert_eq!(err.status, Some(404));
    }
}
