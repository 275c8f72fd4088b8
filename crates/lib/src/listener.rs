//! Listeners: a matcher paired with an async callback.
//!
//! A listener is attempted against one message at a time. When its matcher hits,
//! a [`Response`] is built from the match data and the listener middleware chain
//! runs with the callback as its terminal action.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{panic_message, DispatchError};
use crate::message::{Message, MessageKind};
use crate::middleware::ListenerContext;
use crate::response::Response;
use crate::robot::Robot;

/// Match data handed to the callback: index 0 is the whole match, then each
/// capture group in order (`None` for groups that did not participate).
pub type Matches = Vec<Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Miss,
    Hit(Matches),
}

pub type Predicate = dyn Fn(&Message) -> bool + Send + Sync;

/// How one listener attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Matcher missed or panicked, or listener middleware stopped the callback.
    NotExecuted,
    /// Callback ran and returned `Ok`.
    Executed,
    /// Callback ran but failed or panicked. Still counts as handled.
    Failed,
}

impl Attempt {
    /// True when the callback ran, whatever its result.
    pub fn ran(self) -> bool {
        !matches!(self, Attempt::NotExecuted)
    }
}

#[derive(Clone)]
pub enum Matcher {
    Predicate(Arc<Predicate>),
    /// Only ever matches text messages.
    Regex(Regex),
}

impl Matcher {
    pub fn attempt(&self, message: &Message) -> MatchOutcome {
        match self {
            Matcher::Predicate(p) => {
                if p(message) {
                    MatchOutcome::Hit(Vec::new())
                } else {
                    MatchOutcome::Miss
                }
            }
            Matcher::Regex(re) => {
                let MessageKind::Text { text } = &message.kind else {
                    return MatchOutcome::Miss;
                };
                match re.captures(text) {
                    Some(caps) => MatchOutcome::Hit(
                        caps.iter()
                            .map(|m| m.map(|m| m.as_str().to_string()))
                            .collect(),
                    ),
                    None => MatchOutcome::Miss,
                }
            }
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Predicate(_) => f.write_str("Predicate"),
            Matcher::Regex(re) => write!(f, "Regex(/{}/)", re.as_str()),
        }
    }
}

/// Free-form listener options. `id` names the listener in logs and errors.
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    pub id: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ListenerOptions {
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl From<&str> for ListenerOptions {
    fn from(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }
}

impl From<()> for ListenerOptions {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

type Callback = dyn Fn(Response) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

pub struct Listener {
    matcher: Matcher,
    options: ListenerOptions,
    callback: Arc<Callback>,
}

impl Listener {
    pub fn new<F, Fut>(matcher: Matcher, options: ListenerOptions, callback: F) -> Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            matcher,
            options,
            callback: Arc::new(move |res| callback(res).boxed()),
        }
    }

    /// Listener that fires on text messages matching `regex`.
    pub fn text<F, Fut>(regex: Regex, options: ListenerOptions, callback: F) -> Self
    where
        F: Fn(Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(Matcher::Regex(regex), options, callback)
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn regex(&self) -> Option<&Regex> {
        match &self.matcher {
            Matcher::Regex(re) => Some(re),
            Matcher::Predicate(_) => None,
        }
    }

    /// Name used in logs and errors: the option id, else the regex source.
    pub fn id(&self) -> String {
        if let Some(id) = &self.options.id {
            return id.clone();
        }
        match &self.matcher {
            Matcher::Regex(re) => format!("/{}/", re.as_str()),
            Matcher::Predicate(_) => "<predicate>".to_string(),
        }
    }

    /// Attempt this listener against `message`.
    pub(crate) async fn call(self: &Arc<Self>, robot: &Arc<Robot>, message: &Arc<Message>) -> Attempt {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.matcher.attempt(message)));
        let matches = match outcome {
            Ok(MatchOutcome::Hit(matches)) => matches,
            Ok(MatchOutcome::Miss) => return Attempt::NotExecuted,
            Err(panic) => {
                let error = DispatchError::Matcher {
                    listener: self.id(),
                    message: panic_message(&*panic),
                };
                let response = Response::new(Arc::clone(robot), Arc::clone(message), Vec::new());
                robot.error_handlers().invoke(&error, Some(&response));
                return Attempt::NotExecuted;
            }
        };

        if let Some(re) = self.regex() {
            log::debug!(
                "Message '{}' matched regex /{}/; listener.options = {:?}",
                message,
                re.as_str(),
                self.options
            );
        }

        let context = ListenerContext {
            listener: Arc::clone(self),
            response: Response::new(Arc::clone(robot), Arc::clone(message), matches),
        };
        robot
            .middleware()
            .listener
            .execute(context, |context| async move {
                context.listener.invoke(context.response).await
            })
            .await
            .completed()
            .unwrap_or(Attempt::NotExecuted)
    }

    async fn invoke(&self, response: Response) -> Attempt {
        log::debug!("Executing listener callback for Message '{}'", response.message());
        let result = AssertUnwindSafe((self.callback)(response.clone()))
            .catch_unwind()
            .await;
        let error = match result {
            Ok(Ok(())) => return Attempt::Executed,
            Ok(Err(error)) => DispatchError::Callback {
                listener: self.id(),
                error,
            },
            Err(panic) => DispatchError::CallbackPanic {
                listener: self.id(),
                message: panic_message(&*panic),
            },
        };
        response.robot().error_handlers().invoke(&error, Some(&response));
        Attempt::Failed
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("matcher", &self.matcher)
            .field("options", &self.options)
            .finish()
    }
}
