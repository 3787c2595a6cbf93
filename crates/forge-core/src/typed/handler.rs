//! Handler traits.
//!
//! - `Handler<J>`: typed, receives the decoded job.
//! - `TaskHandler`: object-safe, receives the raw context.
//! - `TypedHandler<J, H>`: erases `Handler<J>` into `TaskHandler`.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::context::TaskContext;
use super::job::Job;
use crate::domain::Outcome;
use crate::error::HandlerError;

/// What the scheduler invokes for every attempt.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: TaskContext) -> Result<Outcome, HandlerError>;
}

/// Typed handler for one `Job` type.
///
/// ```ignore
/// struct PriceCheckHandler;
///
/// #[async_trait]
/// impl Handler<PriceCheck> for PriceCheckHandler {
///     async fn handle(&self, job: PriceCheck, ctx: TaskContext) -> Result<Outcome, HandlerError> {
///         let quote = ctx.fetch("prices", &json!({ "symbol": job.symbol })).await?;
///         Ok(Outcome::with_output(quote))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<J: Job>: Send + Sync {
    async fn handle(&self, job: J, ctx: TaskContext) -> Result<Outcome, HandlerError>;
}

pub struct TypedHandler<J: Job, H: Handler<J>> {
    handler: H,
    _marker: PhantomData<fn() -> J>,
}

impl<J: Job, H: Handler<J>> TypedHandler<J, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<J: Job, H: Handler<J>> TaskHandler for TypedHandler<J, H> {
    async fn execute(&self, ctx: TaskContext) -> Result<Outcome, HandlerError> {
        // A payload that does not decode will not decode on retry either.
        let job: J = serde_json::from_value(ctx.payload().clone())
            .map_err(|e| HandlerError::permanent(format!("payload decode for {}: {e}", J::TYPE)))?;
        self.handler.handle(job, ctx).await
    }
}

/// Adapter turning an async closure into a `TaskHandler`.
pub struct FnHandler<F> {
    f: F,
}

/// ```ignore
/// registry.register_dyn("noop", Arc::new(handler_fn(|_ctx| async { Ok(Outcome::empty()) })))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Outcome, HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Outcome, HandlerError>> + Send,
{
    async fn execute(&self, ctx: TaskContext) -> Result<Outcome, HandlerError> {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) struct Echo {
        pub value: i32,
    }

    impl Job for Echo {
        const TYPE: &'static str = "test.echo.v1";
    }

    pub(crate) struct EchoHandler;

    #[async_trait]
    impl Handler<Echo> for EchoHandler {
        async fn handle(&self, job: Echo, _ctx: TaskContext) -> Result<Outcome, HandlerError> {
            Ok(Outcome::with_output(serde_json::json!(job.value)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{Echo, EchoHandler};
    use super::*;
    use crate::typed::context::fixtures::context;
    use serde_json::json;

    #[tokio::test]
    async fn typed_handler_decodes_payload() {
        let handler = TypedHandler::<Echo, _>::new(EchoHandler);
        let outcome = handler.execute(context(json!({ "value": 100 }))).await.unwrap();
        assert_eq!(outcome.output, json!(100));
    }

    #[tokio::test]
    async fn undecodable_payload_is_permanent() {
        let handler = TypedHandler::<Echo, _>::new(EchoHandler);
        let err = handler
            .execute(context(json!({ "value": "not a number" })))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = handler_fn(|ctx: TaskContext| async move {
            Ok::<_, HandlerError>(Outcome::with_output(json!(ctx.attempt())))
        });
        let outcome = handler.execute(context(json!(null))).await.unwrap();
        assert_eq!(outcome.output, json!(1));
    }
}
