//! Line-oriented console front end: turns stdin lines into session commands and prints what
//! changed.

use std::collections::HashSet;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::common::{ChatMessage, SessionSnapshot, User};
use crate::error::SessionResult;
use crate::session::SessionHandle;

pub const HELP: &str = "commands: <text> | /ttl <secs> <text> | /del <id> | /inc | /dec | \
/typing on|off | /who | /show | /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Send {
        content: String,
        expires_in_secs: Option<u64>,
    },
    Delete(String),
    Increment,
    Decrement,
    Typing(bool),
    Who,
    Show,
    Help,
    Quit,
    Nothing,
}

pub fn parse_line(line: &str) -> Result<ConsoleInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleInput::Nothing);
    }
    if !line.starts_with('/') {
        return Ok(ConsoleInput::Send {
            content: line.to_string(),
            expires_in_secs: None,
        });
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "/ttl" => {
            let (secs, text) = rest
                .split_once(' ')
                .ok_or_else(|| "usage: /ttl <secs> <text>".to_string())?;
            let secs = secs
                .parse::<u64>()
                .map_err(|_| format!("not a number of seconds: {secs}"))?;
            Ok(ConsoleInput::Send {
                content: text.trim().to_string(),
                expires_in_secs: Some(secs),
            })
        }
        "/del" if !rest.is_empty() => Ok(ConsoleInput::Delete(rest.to_string())),
        "/del" => Err("usage: /del <message id>".to_string()),
        "/inc" => Ok(ConsoleInput::Increment),
        "/dec" => Ok(ConsoleInput::Decrement),
        "/typing" => match rest {
            "on" => Ok(ConsoleInput::Typing(true)),
            "off" => Ok(ConsoleInput::Typing(false)),
            _ => Err("usage: /typing on|off".to_string()),
        },
        "/who" => Ok(ConsoleInput::Who),
        "/show" => Ok(ConsoleInput::Show),
        "/help" => Ok(ConsoleInput::Help),
        "/quit" | "/exit" => Ok(ConsoleInput::Quit),
        other => Err(format!("unknown command {other}")),
    }
}

pub fn format_message(message: &ChatMessage, now: i64) -> String {
    match (message.visible_content(now), message.remaining_secs(now)) {
        (None, _) => format!("[{}] {}: Message has expired", message.id, message.username),
        (Some(content), Some(secs)) => format!(
            "[{}] {}: {content} (expires in {secs}s)",
            message.id, message.username
        ),
        (Some(content), None) => format!("[{}] {}: {content}", message.id, message.username),
    }
}

/// "X is typing...", "X and Y are typing...", or "N users are typing...". Unknown ids are skipped.
pub fn typing_summary(users: &[User], typing_users: &[String]) -> Option<String> {
    let names: Vec<&str> = typing_users
        .iter()
        .filter_map(|id| users.iter().find(|user| &user.id == id))
        .map(|user| user.username.as_str())
        .collect();

    match names.as_slice() {
        [] => None,
        [one] => Some(format!("{one} is typing...")),
        [first, second] => Some(format!("{first} and {second} are typing...")),
        many => Some(format!("{} users are typing...", many.len())),
    }
}

pub fn format_users(users: &[User], my_id: &str) -> String {
    let mut lines = vec![format!("Active users ({})", users.len())];
    for user in users {
        let marker = if user.id == my_id { " (you)" } else { "" };
        lines.push(format!("  {}{marker}", user.username));
    }
    lines.join("\n")
}

pub fn render(snapshot: &SessionSnapshot, my_id: &str, now: i64) -> String {
    let mut out = vec![format_users(&snapshot.users, my_id)];

    let counter = &snapshot.counter;
    match &counter.last_updated_by {
        Some(editor) => out.push(format!("Counter: {} (last changed by {editor})", counter.value)),
        None => out.push(format!("Counter: {}", counter.value)),
    }

    if snapshot.messages.is_empty() {
        out.push("No messages yet.".to_string());
    }
    for message in &snapshot.messages {
        out.push(format_message(message, now));
    }
    if let Some(typing) = typing_summary(&snapshot.users, &snapshot.typing_users) {
        out.push(typing);
    }
    out.join("\n")
}

/// Drives `handle` from stdin until `/quit`, end of input or Ctrl-C, then shuts the session down.
pub async fn run(mut handle: SessionHandle) -> SessionResult<()> {
    println!("You are {} ({})", handle.display_name(), handle.peer_id());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_typing: Option<String> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("Failed to read stdin: {err}");
                        break;
                    }
                };
                match parse_line(&line) {
                    Ok(ConsoleInput::Quit) => break,
                    Ok(input) => execute(&handle, input).await?,
                    Err(usage) => println!("{usage}"),
                }
            }
            changed = handle.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = handle.snapshot();
                let now = Utc::now().timestamp_millis();
                for message in &snapshot.messages {
                    if seen.insert(message.id.clone()) {
                        println!("{}", format_message(message, now));
                    }
                }
                let typing = typing_summary(&snapshot.users, &snapshot.typing_users);
                if typing != last_typing {
                    if let Some(text) = &typing {
                        println!("{text}");
                    }
                    last_typing = typing;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await
}

async fn execute(handle: &SessionHandle, input: ConsoleInput) -> SessionResult<()> {
    match input {
        ConsoleInput::Send {
            content,
            expires_in_secs,
        } => handle.send_message(content, expires_in_secs).await,
        ConsoleInput::Delete(message_id) => handle.delete_message(message_id).await,
        ConsoleInput::Increment => handle.adjust_counter(true).await,
        ConsoleInput::Decrement => handle.adjust_counter(false).await,
        ConsoleInput::Typing(is_typing) => handle.set_typing(is_typing).await,
        ConsoleInput::Who => {
            println!("{}", format_users(&handle.users(), handle.peer_id()));
            handle.touch().await
        }
        ConsoleInput::Show => {
            let now = Utc::now().timestamp_millis();
            println!("{}", render(&handle.snapshot(), handle.peer_id(), now));
            handle.touch().await
        }
        ConsoleInput::Help => {
            println!("{HELP}");
            Ok(())
        }
        ConsoleInput::Quit | ConsoleInput::Nothing => Ok(()),
    }
}
