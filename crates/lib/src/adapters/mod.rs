//! Transport adapters.
//!
//! An adapter binds the robot to a chat source: it turns incoming traffic into
//! [`Message`]s for the robot and delivers outbound strings. The robot drives it
//! through the [`Adapter`] trait and hands it an [`AdapterContext`] when it runs.

mod shell;

pub use shell::ShellAdapter;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::brain::Brain;
use crate::config::Config;
use crate::message::{Envelope, Message};
use crate::robot::RobotEvent;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("adapter is closed")]
    Closed,
    #[error("adapter does not support {0}")]
    Unsupported(&'static str),
    #[error("unknown adapter: {0}")]
    Unknown(String),
}

/// Which adapter operation an outbound response maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendMethod {
    Send,
    Emote,
    Reply,
    Topic,
    Play,
    Locked,
}

impl SendMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendMethod::Send => "send",
            SendMethod::Emote => "emote",
            SendMethod::Reply => "reply",
            SendMethod::Topic => "topic",
            SendMethod::Play => "play",
            SendMethod::Locked => "locked",
        }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter name (e.g. "shell").
    fn name(&self) -> &str;

    async fn send(&self, envelope: &Envelope, strings: &[String]) -> Result<(), AdapterError>;

    async fn reply(&self, envelope: &Envelope, strings: &[String]) -> Result<(), AdapterError>;

    async fn emote(&self, envelope: &Envelope, strings: &[String]) -> Result<(), AdapterError> {
        self.send(envelope, strings).await
    }

    async fn topic(&self, _envelope: &Envelope, _strings: &[String]) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("topic"))
    }

    async fn play(&self, _envelope: &Envelope, _strings: &[String]) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("play"))
    }

    async fn locked(&self, envelope: &Envelope, strings: &[String]) -> Result<(), AdapterError> {
        self.send(envelope, strings).await
    }

    /// Connect and pump inbound messages into `context` until the source ends.
    /// Must call [`AdapterContext::connected`] once ready.
    async fn run(&self, context: AdapterContext) -> Result<(), AdapterError>;

    fn close(&self);
}

/// Route one outbound call to the matching adapter method.
pub async fn deliver(
    adapter: &dyn Adapter,
    method: SendMethod,
    envelope: &Envelope,
    strings: &[String],
) -> Result<(), AdapterError> {
    match method {
        SendMethod::Send => adapter.send(envelope, strings).await,
        SendMethod::Emote => adapter.emote(envelope, strings).await,
        SendMethod::Reply => adapter.reply(envelope, strings).await,
        SendMethod::Topic => adapter.topic(envelope, strings).await,
        SendMethod::Play => adapter.play(envelope, strings).await,
        SendMethod::Locked => adapter.locked(envelope, strings).await,
    }
}

/// What a running adapter gets from the robot.
#[derive(Clone)]
pub struct AdapterContext {
    robot_name: String,
    brain: Arc<Brain>,
    inbound: mpsc::Sender<Arc<Message>>,
    events: broadcast::Sender<RobotEvent>,
}

impl AdapterContext {
    pub fn new(
        robot_name: String,
        brain: Arc<Brain>,
        inbound: mpsc::Sender<Arc<Message>>,
        events: broadcast::Sender<RobotEvent>,
    ) -> Self {
        Self {
            robot_name,
            brain,
            inbound,
            events,
        }
    }

    pub fn robot_name(&self) -> &str {
        &self.robot_name
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    /// Forward an incoming message to the robot.
    pub async fn receive(&self, message: Message) -> Result<(), AdapterError> {
        self.inbound
            .send(Arc::new(message))
            .await
            .map_err(|_| AdapterError::Closed)
    }

    /// Signal that the adapter is ready to receive.
    pub fn connected(&self) {
        if self.events.send(RobotEvent::Connected).is_err() {
            log::debug!("adapter connected; no event subscribers");
        }
    }
}

/// Build a built-in adapter by name.
pub fn build_adapter(name: &str, config: &Config) -> Result<Arc<dyn Adapter>, AdapterError> {
    match name.trim().to_lowercase().as_str() {
        "shell" => Ok(Arc::new(ShellAdapter::stdio(config))),
        other => Err(AdapterError::Unknown(other.to_string())),
    }
}

/// Adapter that drops everything it is given.
#[cfg(test)]
pub(crate) struct NullAdapter;

#[cfg(test)]
#[async_trait]
impl Adapter for NullAdapter {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(&self, _: &Envelope, _: &[String]) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn reply(&self, _: &Envelope, _: &[String]) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn run(&self, context: AdapterContext) -> Result<(), AdapterError> {
        context.connected();
        Ok(())
    }

    fn close(&self) {}
}
