//! Handler and middleware types for the consumer.
//!
//! A handler is an async function over one decoded message. Middlewares wrap
//! handlers; the consumer composes the chain right-to-left at subscribe time
//! so the first registered middleware runs outermost.
//!
//! # Example
//!
//! ```
//! use conveyor_runtime::handler::{EventHandler, EventMiddleware, handler_fn, middleware_fn};
//!
//! let handler = handler_fn(|_ctx, message| async move {
//!     tracing::info!(topic = %message.topic, "handled");
//!     Ok(())
//! });
//!
//! let logging = middleware_fn(|next: EventHandler| {
//!     handler_fn(move |ctx, message| {
//!         let next = next.clone();
//!         async move {
//!             tracing::debug!("before handler");
//!             next.call(ctx, message).await
//!         }
//!     })
//! });
//! ```

use conveyor_core::context::Context;
use conveyor_core::message::EventConsumeMessage;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type HandlerFn =
    dyn Fn(Context, EventConsumeMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// An async function over one decoded message. Errors are `anyhow` because
/// handlers are application code; the consume strategy decides what a
/// handler error means for the commit.
#[derive(Clone)]
pub struct EventHandler(Arc<HandlerFn>);

impl EventHandler {
    /// Invoke the handler for one message.
    pub fn call(
        &self,
        ctx: Context,
        message: EventConsumeMessage,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        (*self.0)(ctx, message)
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventHandler")
    }
}

/// Wrap an async closure into an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Context, EventConsumeMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    EventHandler(Arc::new(move |ctx, message| Box::pin(f(ctx, message))))
}

type MiddlewareFn = dyn Fn(EventHandler) -> EventHandler + Send + Sync;

/// A decorator over [`EventHandler`]s.
#[derive(Clone)]
pub struct EventMiddleware(Arc<MiddlewareFn>);

impl EventMiddleware {
    /// Wrap a handler, producing the decorated handler.
    #[must_use]
    pub fn wrap(&self, next: EventHandler) -> EventHandler {
        (*self.0)(next)
    }
}

impl std::fmt::Debug for EventMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventMiddleware")
    }
}

/// Wrap a closure into an [`EventMiddleware`].
pub fn middleware_fn<F>(f: F) -> EventMiddleware
where
    F: Fn(EventHandler) -> EventHandler + Send + Sync + 'static,
{
    EventMiddleware(Arc::new(f))
}
