//! Robot: owns the listener registry and the middleware chains, and dispatches
//! every incoming message.
//!
//! A receive cycle goes: receive middleware -> listener matching -> (first
//! listener that executes | catch-all re-dispatch) -> done. Listeners are tried
//! one at a time in registration order; the next one is only attempted after
//! the current attempt has finished, with a yield to the scheduler in between.
//! A message that no listener executed for is re-dispatched once, wrapped as a
//! catch-all; a catch-all is never wrapped again.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use regex::Regex;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinSet;

use crate::adapters::{build_adapter, Adapter, AdapterContext, AdapterError};
use crate::brain::Brain;
use crate::config::Config;
use crate::error::{DispatchError, ErrorHandlers};
use crate::listener::{Attempt, Listener, ListenerOptions, Matcher};
use crate::message::{Envelope, Message};
use crate::middleware::{
    from_fn, Flow, ListenerContext, Middleware, ReceiveContext, ResponseContext,
};
use crate::response::Response;

const INBOUND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 16;

/// Robot lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotEvent {
    Running,
    /// The adapter is ready to receive.
    Connected,
    Shutdown,
}

/// How a receive cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Receive middleware stopped the message before matching.
    Aborted,
    /// A listener callback ran, whether or not it succeeded.
    Handled,
    /// No listener callback ran; a catch-all listener handled the re-dispatch.
    CaughtAll,
    /// No callback ran, catch-all included.
    Unhandled,
}

/// The three independent chains.
pub struct MiddlewareChains {
    pub receive: Middleware<ReceiveContext>,
    pub listener: Middleware<ListenerContext>,
    pub response: Middleware<ResponseContext>,
}

pub struct Robot {
    name: String,
    alias: Option<String>,
    adapter: Arc<dyn Adapter>,
    brain: Arc<Brain>,
    listeners: RwLock<Vec<Arc<Listener>>>,
    middleware: MiddlewareChains,
    errors: Arc<ErrorHandlers>,
    events: broadcast::Sender<RobotEvent>,
    shutdown: Notify,
}

impl Robot {
    pub fn new(
        name: impl Into<String>,
        alias: Option<String>,
        adapter: Arc<dyn Adapter>,
    ) -> Arc<Self> {
        Self::with_brain(name, alias, adapter, Arc::new(Brain::new()))
    }

    pub fn with_brain(
        name: impl Into<String>,
        alias: Option<String>,
        adapter: Arc<dyn Adapter>,
        brain: Arc<Brain>,
    ) -> Arc<Self> {
        let name = name.into();
        let alias = alias
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        log::debug!(
            "Robot created with adapter: {}, name: {}, alias: {:?}",
            adapter.name(),
            name,
            alias
        );
        let errors = Arc::new(ErrorHandlers::new());
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        // No storage integration: the brain is usable right away.
        brain.mark_connected();
        Arc::new(Self {
            name,
            alias,
            adapter,
            brain,
            listeners: RwLock::new(Vec::new()),
            middleware: MiddlewareChains {
                receive: Middleware::new("receive", Arc::clone(&errors)),
                listener: Middleware::new("listener", Arc::clone(&errors)),
                response: Middleware::new("response", Arc::clone(&errors)),
            },
            errors,
            events,
            shutdown: Notify::new(),
        })
    }

    /// Build a robot and its built-in adapter from config.
    pub fn from_config(config: &Config) -> Result<Arc<Self>, AdapterError> {
        let adapter = build_adapter(&config.adapter, config)?;
        Ok(Self::new(
            config.robot.name.clone(),
            config.alias().map(str::to_string),
            adapter,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    pub fn middleware(&self) -> &MiddlewareChains {
        &self.middleware
    }

    pub fn error_handlers(&self) -> &Arc<ErrorHandlers> {
        &self.errors
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RobotEvent> {
        self.events.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn emit(&self, event: RobotEvent) {
        if self.events.send(event).is_err() {
            log::trace!("robot event {:?} had no subscribers", event);
        }
    }

    fn push_listener(&self, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Add a listener whose callback runs when `matcher` returns true.
    pub fn listen<P, F, Fut>(&self, matcher: P, options: impl Into<ListenerOptions>, callback: F)
    where
        P: Fn(&Message) -> bool + Send + Sync + 'static,
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_listener(Listener::new(
            Matcher::Predicate(Arc::new(matcher)),
            options.into(),
            callback,
        ));
    }

    /// Add a listener for any text message matching `regex`.
    pub fn hear<F, Fut>(&self, regex: Regex, options: impl Into<ListenerOptions>, callback: F)
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.push_listener(Listener::text(regex, options.into(), callback));
    }

    /// Add a listener for text addressed to the robot by name or alias.
    ///
    /// Only inline flags at the start of the pattern (`(?i)`) survive the
    /// rewrite; options set through `RegexBuilder` are lost. See
    /// [`Robot::respond_pattern`].
    pub fn respond<F, Fut>(
        &self,
        regex: &Regex,
        options: impl Into<ListenerOptions>,
        callback: F,
    ) -> Result<(), regex::Error>
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let pattern = self.respond_pattern(regex)?;
        self.hear(pattern, options, callback);
        Ok(())
    }

    /// Build a regex that only matches when the message starts with the
    /// robot's name or alias (optionally `@`-prefixed and followed by `:` or `,`).
    /// Leading inline flags such as `(?i)` are kept and apply to the whole pattern.
    /// The pattern is rebuilt from `regex.as_str()`, so flags set through
    /// `RegexBuilder` (e.g. `case_insensitive(true)`) are not carried over;
    /// write them inline instead.
    pub fn respond_pattern(&self, regex: &Regex) -> Result<Regex, regex::Error> {
        let (flags, pattern) = split_inline_flags(regex.as_str());
        if pattern.starts_with('^') {
            log::warn!("Anchors don't work well with respond, perhaps you want to use 'hear'");
            log::warn!("The regex in question was {}", regex.as_str());
        }

        let addressed = match &self.alias {
            None => format!("{}[:,]?", escape_name(&self.name)),
            Some(alias) => {
                // Longer first, so a name that prefixes the other cannot cut it short.
                let (first, second) = if self.name.len() > alias.len() {
                    (&self.name, alias)
                } else {
                    (alias, &self.name)
                };
                format!(
                    "(?:{}[:,]?|{}[:,]?)",
                    escape_name(first),
                    escape_name(second)
                )
            }
        };
        Regex::new(&format!(r"{}^\s*[@]?{}\s*(?:{})", flags, addressed, pattern))
    }

    pub fn enter<F, Fut>(&self, options: impl Into<ListenerOptions>, callback: F)
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(Message::is_enter, options, callback);
    }

    pub fn leave<F, Fut>(&self, options: impl Into<ListenerOptions>, callback: F)
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(Message::is_leave, options, callback);
    }

    pub fn topic<F, Fut>(&self, options: impl Into<ListenerOptions>, callback: F)
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(Message::is_topic, options, callback);
    }

    /// Add a listener for messages no other listener executed for. The callback
    /// sees the original message, not the catch-all wrapper.
    pub fn catch_all<F, Fut>(&self, options: impl Into<ListenerOptions>, callback: F)
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(Message::is_catch_all, options, move |res: Response| {
            callback(res.into_original())
        });
    }

    /// Middleware run after a listener matched and before its callback.
    pub fn listener_middleware<F>(&self, f: F)
    where
        F: for<'a> Fn(&'a mut ListenerContext) -> BoxFuture<'a, anyhow::Result<Flow>>
            + Send
            + Sync
            + 'static,
    {
        self.middleware.listener.register(from_fn(f));
    }

    /// Middleware run on every outbound response before it reaches the adapter.
    pub fn response_middleware<F>(&self, f: F)
    where
        F: for<'a> Fn(&'a mut ResponseContext) -> BoxFuture<'a, anyhow::Result<Flow>>
            + Send
            + Sync
            + 'static,
    {
        self.middleware.response.register(from_fn(f));
    }

    /// Middleware run on every incoming message before listener matching.
    pub fn receive_middleware<F>(&self, f: F)
    where
        F: for<'a> Fn(&'a mut ReceiveContext) -> BoxFuture<'a, anyhow::Result<Flow>>
            + Send
            + Sync
            + 'static,
    {
        self.middleware.receive.register(from_fn(f));
    }

    /// Register an error handler.
    pub fn error<F>(&self, handler: F)
    where
        F: Fn(&DispatchError, Option<&Response>) + Send + Sync + 'static,
    {
        self.errors.register(handler);
    }

    /// Dispatch one message: receive middleware, then listeners, then the
    /// catch-all fallback. Resolves when the whole cycle is done.
    pub fn receive(self: &Arc<Self>, message: impl Into<Arc<Message>>) -> BoxFuture<'static, Dispatch> {
        let robot = Arc::clone(self);
        let message = message.into();
        async move {
            let context = ReceiveContext {
                response: Response::new(Arc::clone(&robot), message, Vec::new()),
            };
            robot
                .middleware
                .receive
                .execute(context, |context| robot.process_listeners(context))
                .await
                .completed()
                .unwrap_or(Dispatch::Aborted)
        }
        .boxed()
    }

    async fn process_listeners(self: &Arc<Self>, context: ReceiveContext) -> Dispatch {
        let message = Arc::clone(context.response.message());
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        // A failed callback still counts as handled, but the next listener gets a try.
        let mut any_ran = false;
        for listener in listeners {
            let attempt = listener.call(self, &message).await;
            any_ran |= attempt.ran();
            tokio::task::yield_now().await;
            if attempt == Attempt::Executed || message.is_done() {
                break;
            }
        }

        if any_ran {
            return Dispatch::Handled;
        }
        if message.is_catch_all() {
            return Dispatch::Unhandled;
        }
        log::debug!("No listeners executed; falling back to catch-all");
        match self.receive(Message::catch_all(message)).await {
            Dispatch::Handled => Dispatch::CaughtAll,
            other => other,
        }
    }

    /// Send straight through the adapter, bypassing response middleware.
    pub async fn send<I, S>(&self, envelope: &Envelope, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let strings: Vec<String> = strings.into_iter().map(Into::into).collect();
        self.adapter.send(envelope, &strings).await
    }

    /// Reply straight through the adapter, bypassing response middleware.
    pub async fn reply<I, S>(&self, envelope: &Envelope, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let strings: Vec<String> = strings.into_iter().map(Into::into).collect();
        self.adapter.reply(envelope, &strings).await
    }

    /// Send to a room the robot is in.
    pub async fn message_room<I, S>(&self, room: &str, strings: I) -> Result<(), AdapterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(&Envelope::for_room(room), strings).await
    }

    /// Run the adapter and dispatch what it receives until it stops or
    /// [`Robot::shutdown`] is called. Each message is dispatched on its own task.
    pub async fn run(self: &Arc<Self>) -> Result<(), AdapterError> {
        self.emit(RobotEvent::Running);

        let (tx, mut rx) = mpsc::channel::<Arc<Message>>(INBOUND_BUFFER);
        let context = AdapterContext::new(
            self.name.clone(),
            Arc::clone(&self.brain),
            tx,
            self.events.clone(),
        );
        let adapter = Arc::clone(&self.adapter);
        let adapter_task = tokio::spawn(async move { adapter.run(context).await });

        let mut in_flight = JoinSet::new();
        let mut stopped = false;
        loop {
            tokio::select! {
                inbound = rx.recv() => match inbound {
                    Some(message) => {
                        let robot = Arc::clone(self);
                        in_flight.spawn(async move { robot.receive(message).await });
                    }
                    None => break,
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = self.shutdown.notified() => {
                    stopped = true;
                    break;
                }
            }
        }

        if stopped {
            adapter_task.abort();
            in_flight.shutdown().await;
        } else {
            while in_flight.join_next().await.is_some() {}
        }

        match adapter_task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                log::error!("adapter task failed: {}", e);
                Err(AdapterError::Closed)
            }
        }
    }

    /// Stop the adapter, close the brain and end [`Robot::run`].
    pub fn shutdown(&self) {
        self.emit(RobotEvent::Shutdown);
        self.adapter.close();
        self.brain.close();
        self.shutdown.notify_one();
    }
}

/// Escape a robot name for literal use. Whitespace and `#` are written as hex
/// escapes so they still match under the `x` (verbose) flag.
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_whitespace() || c == '#' {
            out.push_str(&format!("\\x{{{:X}}}", c as u32));
        } else {
            out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
        }
    }
    out
}

/// Split a leading inline flag group (`(?i)`, `(?im)`, `(?-u)`) off a pattern.
fn split_inline_flags(source: &str) -> (&str, &str) {
    if let Some(rest) = source.strip_prefix("(?") {
        if let Some(end) = rest.find(')') {
            let flags = &rest[..end];
            if !flags.is_empty() && flags.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
                return source.split_at(end + 3);
            }
        }
    }
    ("", source)
}
