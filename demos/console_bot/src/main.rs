//! Console Bot
//!
//! A small moderation bot that reads events from stdin, so dispatch order,
//! worker-pool execution and per-chat rate limits can be watched live.
//!
//! Each line is one event in the default chat:
//!
//! ```text
//! /mute @spam        command
//! #42 /mute @spam    same, in chat 42
//! ?approve           button press with callback action "approve"
//! >thanks            reply to a bot message
//! hello              plain text
//! ```
//!
//! With `--json`, each line is a serialized `NormalizedEvent` instead.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --chat 7
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use courier::prelude::*;

#[derive(Parser, Debug)]
#[command(about = "Drive a Courier bot from the terminal")]
struct Cli {
    /// Configuration file (defaults to courier.toml in the working directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. "production".
    #[arg(long)]
    profile: Option<String>,

    /// Read JSON-encoded events instead of text lines.
    #[arg(long)]
    json: bool,

    /// Chat used for lines without a `#<chat>` prefix.
    #[arg(long, default_value_t = 1)]
    chat: ConversationId,

    /// User id attached to text-mode events.
    #[arg(long, default_value_t = 1000)]
    user: UserId,
}

// ============================================================================
// Outbound messages
// ============================================================================

/// Stands in for the chat platform client.
#[derive(Debug, Default)]
struct Console;

impl Console {
    fn send(&self, chat: ConversationId, text: &str) {
        println!("[chat {chat}] bot: {text}");
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn help(Conversation(chat): Conversation, console: Dep<Console>) {
    console.send(
        chat,
        "/ban <user>   ban a user\n\
         /mute <user>  mute a user (once a minute per chat)\n\
         /report       slow report, runs in the background\n\
         /help         this message",
    );
}

async fn ban(args: Args, Conversation(chat): Conversation, console: Dep<Console>) -> Result<()> {
    let Some(target) = args.first() else {
        bail!("/ban needs a user");
    };
    console.send(chat, &format!("{target} has been banned"));
    Ok(())
}

async fn mute(args: Args, Conversation(chat): Conversation, console: Dep<Console>) {
    let target = args.first().map_or("everyone", String::as_str);
    console.send(chat, &format!("{target} has been muted"));
}

async fn report(Conversation(chat): Conversation, console: Dep<Console>) {
    tokio::time::sleep(Duration::from_secs(3)).await;
    console.send(chat, "Report: all quiet");
}

async fn approve(Sender(user): Sender, Conversation(chat): Conversation, console: Dep<Console>) {
    console.send(chat, &format!("Approved by {user}"));
}

async fn log_text(event: Event) {
    info!(
        chat = event.conversation_id,
        user = event.user_id,
        text = event.text().unwrap_or_default(),
        "Message"
    );
}

async fn media(event: Event, console: Dep<Console>) {
    let kinds: Vec<_> = event.content_types.iter().map(|k| k.as_str()).collect();
    console.send(event.conversation_id, &format!("Got {}", kinds.join(", ")));
}

async fn thanks(Conversation(chat): Conversation, console: Dep<Console>) {
    console.send(chat, "Thanks for the reply!");
}

fn registrations() -> Vec<Registration> {
    vec![
        Registration::command(["help", "start"], help),
        Registration::command(["ban"], ban),
        Registration::command(["mute"], mute)
            .run_async()
            .rate_limit(1, Duration::from_secs(60)),
        Registration::command(["report"], report)
            .run_async()
            .delay(Duration::from_millis(500)),
        Registration::callback("approve", approve),
        Registration::text(log_text),
        Registration::any_message(media).filter_names(["Photo", "Video", "Document"]),
        Registration::reply_to_bot(thanks),
    ]
}

// ============================================================================
// Event source
// ============================================================================

/// Turns one text-mode line into an event.
fn parse_line(
    prefix: &str,
    default_chat: ConversationId,
    user: UserId,
    line: &str,
) -> Option<NormalizedEvent> {
    let mut line = line.trim();
    let mut chat = default_chat;

    if let Some(rest) = line.strip_prefix('#') {
        let (id, text) = rest.split_once(char::is_whitespace)?;
        chat = id.parse().ok()?;
        line = text.trim_start();
    }

    if line.is_empty() {
        return None;
    }

    if let Some(action) = line.strip_prefix('?') {
        return Some(NormalizedEvent::callback(chat, user, action.trim()));
    }

    if let Some(text) = line.strip_prefix('>') {
        return Some(NormalizedEvent::text_message(chat, user, text.trim()).replying_to_bot());
    }

    Some(match parse_command(prefix, line) {
        Some(command) => {
            let mut event = NormalizedEvent::text_message(chat, user, line);
            event.command = Some(command.name);
            event.args = command.args;
            event
        }
        None => NormalizedEvent::text_message(chat, user, line),
    })
}

fn console_events(cli: &Cli, prefix: String) -> impl Stream<Item = NormalizedEvent> + use<> {
    let (json, chat, user) = (cli.json, cli.chat, cli.user);
    let lines = BufReader::new(tokio::io::stdin()).lines();

    futures::stream::unfold(lines, move |mut lines| {
        let prefix = prefix.clone();
        async move {
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => return None,
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        return None;
                    }
                };

                let event = if json {
                    serde_json::from_str(&line)
                        .inspect_err(|e| warn!(error = %e, "Skipping malformed event"))
                        .ok()
                } else {
                    parse_line(&prefix, chat, user, &line)
                };

                if let Some(event) = event {
                    return Some((event, lines));
                }
            }
        }
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = CourierRuntime::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }
    let mut runtime = builder.build()?;

    runtime.provide(Console);
    let registered = runtime.register_all(registrations());
    info!(registered, "Handlers registered");

    let prefix = runtime.config().bot.command_prefix.clone();
    let events = console_events(&cli, prefix);
    let stats = runtime.start()?.run(events).await?;

    info!(
        events = stats.events,
        unmatched = stats.unmatched,
        queued = stats.queued,
        failed = stats.failed,
        "Bye"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_chat_override() {
        let event = parse_line("/", 1, 9, "#42 /Mute @spam").unwrap();
        assert_eq!(event.conversation_id, 42);
        assert_eq!(event.command(), Some("mute"));
        assert_eq!(event.args, vec!["@spam"]);
        assert_eq!(event.text(), Some("/Mute @spam"));
    }

    #[test]
    fn parses_callbacks_and_replies() {
        let press = parse_line("/", 1, 9, "?approve").unwrap();
        assert_eq!(press.action(), Some("approve"));

        let reply = parse_line("/", 1, 9, "> ok").unwrap();
        assert!(reply.is_reply_to_bot_message);
        assert_eq!(reply.text(), Some("ok"));
    }

    #[test]
    fn skips_blank_and_malformed_lines() {
        assert!(parse_line("/", 1, 9, "   ").is_none());
        assert!(parse_line("/", 1, 9, "#abc hi").is_none());
        assert!(parse_line("/", 1, 9, "#7").is_none());
    }

    #[test]
    fn registrations_are_accepted() {
        let mut runtime = CourierRuntime::from_config(&Default::default());
        runtime.provide(Console);
        assert_eq!(runtime.register_all(registrations()), 8);
    }
}
