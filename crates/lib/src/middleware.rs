//! Ordered interceptor chains run around dispatch.
//!
//! The robot owns three independent chains: `receive` (before listener
//! matching), `listener` (after a listener matched, before its callback) and
//! `response` (before outbound text reaches the adapter). Each interceptor
//! returns [`Flow::Proceed`] to hand the context to the next one, or
//! [`Flow::Abort`] to stop the chain. The caller's terminal action only runs
//! when every interceptor proceeded.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use crate::adapters::SendMethod;
use crate::error::{panic_message, DispatchError, ErrorHandlers};
use crate::listener::Listener;
use crate::response::Response;

/// What an interceptor wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Proceed,
    Abort,
}

/// Result of running a chain once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome<R> {
    /// All interceptors proceeded; carries the terminal action's output.
    Completed(R),
    Aborted,
}

impl<R> ChainOutcome<R> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ChainOutcome::Completed(_))
    }

    pub fn completed(self) -> Option<R> {
        match self {
            ChainOutcome::Completed(r) => Some(r),
            ChainOutcome::Aborted => None,
        }
    }
}

/// Shared state of a chain run. Every context carries the response in flight
/// so failures can be reported with it.
pub trait MiddlewareContext: Send + 'static {
    fn response(&self) -> &Response;
}

/// Context for the receive chain.
pub struct ReceiveContext {
    pub response: Response,
}

/// Context for the listener chain: the listener that matched and its response.
pub struct ListenerContext {
    pub listener: Arc<Listener>,
    pub response: Response,
}

/// Context for the response chain. Interceptors may rewrite `strings`;
/// nothing is sent when it ends up empty.
pub struct ResponseContext {
    pub response: Response,
    pub strings: Vec<String>,
    pub method: SendMethod,
    pub plaintext: bool,
}

impl MiddlewareContext for ReceiveContext {
    fn response(&self) -> &Response {
        &self.response
    }
}

impl MiddlewareContext for ListenerContext {
    fn response(&self) -> &Response {
        &self.response
    }
}

impl MiddlewareContext for ResponseContext {
    fn response(&self) -> &Response {
        &self.response
    }
}

#[async_trait]
pub trait Interceptor<C: Send>: Send + Sync {
    async fn handle(&self, context: &mut C) -> anyhow::Result<Flow>;
}

/// Interceptor backed by an async closure.
pub struct FnInterceptor<C, F> {
    f: F,
    _context: PhantomData<fn(&mut C)>,
}

/// Wrap an async closure (`|ctx| async move { .. }.boxed()`) as an interceptor.
pub fn from_fn<C, F>(f: F) -> FnInterceptor<C, F>
where
    F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, anyhow::Result<Flow>> + Send + Sync,
{
    FnInterceptor {
        f,
        _context: PhantomData,
    }
}

#[async_trait]
impl<C, F> Interceptor<C> for FnInterceptor<C, F>
where
    C: Send + 'static,
    F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, anyhow::Result<Flow>> + Send + Sync,
{
    async fn handle(&self, context: &mut C) -> anyhow::Result<Flow> {
        (self.f)(context).await
    }
}

/// Interceptor backed by a synchronous closure.
pub struct SyncInterceptor<C, F> {
    f: F,
    _context: PhantomData<fn(&mut C)>,
}

pub fn interceptor_fn<C, F>(f: F) -> SyncInterceptor<C, F>
where
    F: Fn(&mut C) -> anyhow::Result<Flow> + Send + Sync,
{
    SyncInterceptor {
        f,
        _context: PhantomData,
    }
}

#[async_trait]
impl<C, F> Interceptor<C> for SyncInterceptor<C, F>
where
    C: Send + 'static,
    F: Fn(&mut C) -> anyhow::Result<Flow> + Send + Sync,
{
    async fn handle(&self, context: &mut C) -> anyhow::Result<Flow> {
        (self.f)(context)
    }
}

/// One named, ordered chain of interceptors.
pub struct Middleware<C> {
    chain: &'static str,
    stack: RwLock<Vec<Arc<dyn Interceptor<C>>>>,
    errors: Arc<ErrorHandlers>,
}

impl<C: MiddlewareContext> Middleware<C> {
    pub fn new(chain: &'static str, errors: Arc<ErrorHandlers>) -> Self {
        Self {
            chain,
            stack: RwLock::new(Vec::new()),
            errors,
        }
    }

    pub fn name(&self) -> &'static str {
        self.chain
    }

    /// Append an interceptor. No dedup, no priority.
    pub fn register<I>(&self, interceptor: I)
    where
        I: Interceptor<C> + 'static,
    {
        self.stack
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(interceptor));
    }

    pub fn len(&self) -> usize {
        self.stack.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every interceptor in order over `context`, then `terminal`.
    ///
    /// An interceptor that aborts, fails or panics stops the chain; failures are
    /// routed to the error hook with the context's response.
    pub async fn execute<F, Fut, R>(&self, mut context: C, terminal: F) -> ChainOutcome<R>
    where
        F: FnOnce(C) -> Fut,
        Fut: Future<Output = R>,
    {
        let stack = self
            .stack
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for interceptor in stack {
            let result = AssertUnwindSafe(interceptor.handle(&mut context))
                .catch_unwind()
                .await;
            let error = match result {
                Ok(Ok(Flow::Proceed)) => continue,
                Ok(Ok(Flow::Abort)) => {
                    log::debug!("{} middleware aborted", self.chain);
                    return ChainOutcome::Aborted;
                }
                Ok(Err(error)) => DispatchError::Middleware {
                    chain: self.chain,
                    error,
                },
                Err(panic) => DispatchError::MiddlewarePanic {
                    chain: self.chain,
                    message: panic_message(&*panic),
                },
            };
            self.errors.invoke(&error, Some(context.response()));
            return ChainOutcome::Aborted;
        }
        ChainOutcome::Completed(terminal(context).await)
    }
}
