//! Hook handler trait and closure adapter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use hookbus_types::{Event, HookResult};

/// Callable invoked with an event.
///
/// Handlers of one event run concurrently. Returning `Err` or a result with
/// `success: false` both count as a failed execution.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Name used for logging, statistics and enable/disable lookups.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> anyhow::Result<HookResult>;
}

/// Boxed future returned by closure handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<HookResult>> + Send>>;

type HandlerFn = Box<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// A [`HookHandler`] backed by a closure. Build one with [`handler_fn`].
pub struct FnHandler {
    name: String,
    f: HandlerFn,
}

#[async_trait]
impl HookHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<HookResult> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```rust,ignore
/// let handler = handler_fn("greeter", |event| async move {
///     Ok(HookResult::ok().with_message(format!("hello from {}", event.action)))
/// });
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn HookHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HookResult>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f: Box::new(move |event| Box::pin(f(event))),
    })
}

/// Whether two handler references point at the same handler instance.
pub fn same_handler(a: &Arc<dyn HookHandler>, b: &Arc<dyn HookHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookbus_types::EventType;

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn("echo", |event: Event| async move {
            Ok(HookResult::ok().with_message(event.action))
        });
        assert_eq!(handler.name(), "echo");

        let result = handler
            .handle(&Event::new(EventType::Command, "ping", "s"))
            .await
            .unwrap();
        assert_eq!(result.messages, vec!["ping"]);
    }

    #[test]
    fn test_same_handler() {
        let a = handler_fn("a", |_| async { Ok(HookResult::ok()) });
        let b = handler_fn("a", |_| async { Ok(HookResult::ok()) });
        assert!(same_handler(&a, &a.clone()));
        assert!(!same_handler(&a, &b));
    }
}
