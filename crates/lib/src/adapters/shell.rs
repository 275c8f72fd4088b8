//! Shell adapter: chat with the robot on the console.
//!
//! Reads one message per line from the input and prints robot output as
//! `<robot>> <line>`. `exit`, `quit` or end of input ends the session.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::{Adapter, AdapterContext, AdapterError};
use crate::config::{Config, ShellConfig};
use crate::message::{Envelope, Message, User};

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

pub struct ShellAdapter {
    robot_name: String,
    shell: ShellConfig,
    open: AtomicBool,
    input: Mutex<Option<Input>>,
    output: Mutex<Output>,
}

impl ShellAdapter {
    /// Shell bound to the process's stdin and stdout.
    pub fn stdio(config: &Config) -> Self {
        Self::with_io(
            config,
            Box::new(BufReader::new(tokio::io::stdin())),
            Box::new(tokio::io::stdout()),
        )
    }

    pub fn with_io(config: &Config, input: Input, output: Output) -> Self {
        Self {
            robot_name: config.robot.name.clone(),
            shell: config.shell.clone(),
            open: AtomicBool::new(false),
            input: Mutex::new(Some(input)),
            output: Mutex::new(output),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn write(&self, text: &str) -> Result<(), AdapterError> {
        let mut out = self.output.lock().await;
        out.write_all(text.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Prefix every line of every string with `<prefix>> `.
fn format_lines(prefix: &str, strings: &[String]) -> String {
    let mut out = String::new();
    for s in strings {
        for line in s.lines() {
            out.push_str(prefix);
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[async_trait]
impl Adapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    async fn send(&self, _envelope: &Envelope, strings: &[String]) -> Result<(), AdapterError> {
        self.write(&format_lines(&self.robot_name, strings)).await
    }

    async fn emote(&self, envelope: &Envelope, strings: &[String]) -> Result<(), AdapterError> {
        let strings: Vec<String> = strings.iter().map(|s| format!("* {}", s)).collect();
        self.send(envelope, &strings).await
    }

    async fn reply(&self, envelope: &Envelope, strings: &[String]) -> Result<(), AdapterError> {
        let name = envelope
            .user
            .as_ref()
            .map(|u| u.name.as_str())
            .unwrap_or(self.shell.user_name.as_str());
        let strings: Vec<String> = strings.iter().map(|s| format!("@{} {}", name, s)).collect();
        self.send(envelope, &strings).await
    }

    async fn run(&self, context: AdapterContext) -> Result<(), AdapterError> {
        let mut input = self.input.lock().await.take().ok_or(AdapterError::Closed)?;
        let template = User::new(self.shell.user_id.clone())
            .with_name(self.shell.user_name.clone())
            .with_room(self.shell.room.clone());
        let user = context.brain().user_for_id(&self.shell.user_id, Some(&template));

        self.open.store(true, Ordering::SeqCst);
        context.connected();
        log::info!("shell adapter connected as {}", user.name);

        let mut line = String::new();
        while self.is_open() {
            self.write(&format!("{}> ", user.name)).await?;
            line.clear();
            if input.read_line(&mut line).await? == 0 {
                break;
            }
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
                break;
            }
            let id = uuid::Uuid::new_v4().to_string();
            context
                .receive(Message::text(user.clone(), text, Some(id)))
                .await?;
        }

        self.open.store(false, Ordering::SeqCst);
        log::info!("shell adapter: input closed");
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::Brain;
    use crate::robot::RobotEvent;
    use std::sync::Arc;
    use tokio::sync::{broadcast, mpsc};

    #[test]
    fn format_lines_prefixes_each_line() {
        let out = format_lines("Nubot", &["one\ntwo".to_string(), "three".to_string()]);
        assert_eq!(out, "Nubot> one\nNubot> two\nNubot> three\n");
    }

    #[tokio::test]
    async fn run_forwards_lines_until_exit() {
        let config = Config::default();
        let input: Input = Box::new(&b"ping\n\n  hello there  \nexit\nignored\n"[..]);
        let shell = ShellAdapter::with_io(&config, input, Box::new(tokio::io::sink()));

        let (tx, mut rx) = mpsc::channel(8);
        let (events, mut events_rx) = broadcast::channel(8);
        let brain = Arc::new(Brain::new());
        let context = AdapterContext::new("Nubot".into(), Arc::clone(&brain), tx, events);

        shell.run(context).await.unwrap();

        assert_eq!(events_rx.recv().await.unwrap(), RobotEvent::Connected);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.text_content(), Some("ping"));
        assert_eq!(first.user.name, "user");
        assert_eq!(first.room.as_deref(), Some("shell"));
        assert_eq!(rx.recv().await.unwrap().text_content(), Some("hello there"));
        assert!(rx.recv().await.is_none());
        assert!(brain.user_for_name("user").is_some());
    }

    #[tokio::test]
    async fn run_twice_is_closed() {
        let config = Config::default();
        let shell = ShellAdapter::with_io(&config, Box::new(&b""[..]), Box::new(tokio::io::sink()));
        let (tx, _rx) = mpsc::channel(1);
        let (events, _) = broadcast::channel(1);
        let context = AdapterContext::new("Nubot".into(), Arc::new(Brain::new()), tx, events);
        shell.run(context.clone()).await.unwrap();
        assert!(matches!(shell.run(context).await, Err(AdapterError::Closed)));
    }
}
