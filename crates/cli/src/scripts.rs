//! Scripts bundled with the binary. Enough to poke at a running robot from the shell.

use nubot::Robot;
use regex::Regex;
use std::sync::Arc;

/// Command summaries shown by `help`. `{name}` is replaced by the robot name.
const COMMANDS: &[&str] = &[
    "ping - Reply with pong",
    "brain - Reply with the brain's contents as JSON",
    "{name} help - Show this list",
];

pub fn load(robot: &Arc<Robot>) -> Result<(), regex::Error> {
    robot.hear(Regex::new("(?i)ping")?, "ping", |res| async move {
        res.reply(["pong"]).await?;
        anyhow::Ok(())
    });

    robot.hear(Regex::new("(?i)brain")?, "brain", |res| async move {
        let data = serde_json::to_string(&res.robot().brain().data())?;
        res.reply([data]).await?;
        anyhow::Ok(())
    });

    robot.respond(&Regex::new("(?i)help")?, "help", |res| async move {
        let name = res.robot().name().to_string();
        let lines: Vec<String> = COMMANDS.iter().map(|c| c.replace("{name}", &name)).collect();
        res.send([lines.join("\n")]).await?;
        anyhow::Ok(())
    })?;

    robot.catch_all("catch-all", |res| async move {
        if res.message().is_text() {
            res.reply(["Sorry, I didn't catch that."]).await?;
        }
        anyhow::Ok(())
    });

    robot.error(|err, res| {
        log::error!("script error: {}", err);
        let Some(res) = res.cloned() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            if let Err(e) = res.reply(["Something went wrong."]).await {
                log::warn!("could not report error to user: {}", e);
            }
        });
    });

    Ok(())
}
