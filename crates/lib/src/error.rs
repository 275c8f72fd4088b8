//! Dispatch errors and the error hook.
//!
//! Failures inside a receive cycle (a matcher, a listener callback, a middleware
//! interceptor) never reach the adapter. They are recovered where they happen and
//! delivered as a [`DispatchError`] to every handler registered on [`ErrorHandlers`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::response::Response;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("matcher for listener {listener} panicked: {message}")]
    Matcher { listener: String, message: String },
    #[error("callback for listener {listener} failed: {error:#}")]
    Callback {
        listener: String,
        error: anyhow::Error,
    },
    #[error("callback for listener {listener} panicked: {message}")]
    CallbackPanic { listener: String, message: String },
    #[error("{chain} middleware failed: {error:#}")]
    Middleware {
        chain: &'static str,
        error: anyhow::Error,
    },
    #[error("{chain} middleware panicked: {message}")]
    MiddlewarePanic {
        chain: &'static str,
        message: String,
    },
}

/// Handler invoked with the error and the response that was in flight, if any.
pub type ErrorHandler = dyn Fn(&DispatchError, Option<&Response>) + Send + Sync;

/// Registered error handlers, shared by the robot and its middleware chains.
#[derive(Default)]
pub struct ErrorHandlers {
    handlers: RwLock<Vec<Arc<ErrorHandler>>>,
}

impl ErrorHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, handler: F)
    where
        F: Fn(&DispatchError, Option<&Response>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Log the error, then call each handler once in registration order.
    /// A handler that panics is logged and skipped.
    pub fn invoke(&self, error: &DispatchError, response: Option<&Response>) {
        log::error!("{}", error);
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(error, response))) {
                log::error!("while invoking error handler: {}", panic_message(&*panic));
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> DispatchError {
        DispatchError::Matcher {
            listener: "l1".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn every_handler_runs_once() {
        let hooks = ErrorHandlers::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            hooks.register(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        hooks.invoke(&sample(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let hooks = ErrorHandlers::new();
        let calls = Arc::new(AtomicUsize::new(0));
        hooks.register(|_, _| panic!("handler broke"));
        let c = Arc::clone(&calls);
        hooks.register(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        hooks.invoke(&sample(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn display_includes_listener() {
        let err = DispatchError::Callback {
            listener: "ping".into(),
            error: anyhow::anyhow!("no route"),
        };
        assert_eq!(err.to_string(), "callback for listener ping failed: no route");
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("static");
        let b: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*a), "static");
        assert_eq!(panic_message(&*b), "owned");
    }
}
