//! LoggingContext
//!
//! An ambient bag of correlation/causation/tenant/user fields that
//! travels with a request across `tokio::spawn` boundaries, so a
//! background task (the outbox dispatcher, a scheduled job) can log with
//! the same fields a request handler would without threading an extra
//! parameter through every call. This complements, rather than
//! replaces, `domain::OperationContext`: `OperationContext` is the
//! explicit DTO stamped onto audit rows and persisted events;
//! `LoggingContext` is the implicit carrier picked up by `tracing`
//! spans and by code that has no direct access to the request's
//! `OperationContext` value (a spawned task, a different call stack).

use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct LoggingContext {
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub request_user_id: Option<Uuid>,
    pub operation: Option<String>,
}

impl LoggingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_causation_id(mut self, id: Uuid) -> Self {
        self.causation_id = Some(id);
        self
    }

    pub fn with_tenant_id(mut self, id: Uuid) -> Self {
        self.tenant_id = Some(id);
        self
    }

    pub fn with_request_user_id(mut self, id: Uuid) -> Self {
        self.request_user_id = Some(id);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn from_operation_context(ctx: &crate::domain::OperationContext) -> Self {
        Self {
            correlation_id: ctx.correlation_id,
            causation_id: None,
            tenant_id: None,
            request_user_id: ctx.request_user_id,
            operation: None,
        }
    }
}

tokio::task_local! {
    static CURRENT: LoggingContext;
}

/// Run `f` with `context` installed as the ambient `LoggingContext` for
/// its entire async call tree (not just the current task - a
/// `tokio::spawn`ed child started via `spawn_with_current` below also
/// sees it).
pub async fn scope<F, T>(context: LoggingContext, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT.scope(context, f).await
}

/// The ambient context for the current task, or the default (empty) one
/// if none has been installed via `scope`.
pub fn current() -> LoggingContext {
    CURRENT.try_with(|ctx| ctx.clone()).unwrap_or_default()
}

/// Spawn `f` on a new task, carrying the calling task's `LoggingContext`
/// with it. `tokio::spawn` alone does not propagate task-locals - this
/// is the seam that makes sure the outbox dispatcher and scheduled jobs,
/// which run on their own spawned tasks, still tag their logs with
/// whatever request originated the work they're now processing.
pub fn spawn_with_current<F>(f: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    let ctx = current();
    tokio::spawn(scope(ctx, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_is_visible_within_but_not_outside() {
        assert!(current().correlation_id.is_none());

        let id = Uuid::new_v4();
        scope(LoggingContext::new().with_correlation_id(id), async {
            assert_eq!(current().correlation_id, Some(id));
        })
        .await;

        assert!(current().correlation_id.is_none());
    }

    #[tokio::test]
    async fn spawn_with_current_propagates_context() {
        let id = Uuid::new_v4();
        let handle = scope(LoggingContext::new().with_correlation_id(id), async {
            spawn_with_current(async { current().correlation_id })
        })
        .await;

        assert_eq!(handle.await.unwrap(), Some(id));
    }
}
