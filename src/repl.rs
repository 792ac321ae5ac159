use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ChatError;
use crate::governor::GovernorStatus;
use crate::metrics;
use crate::models::{Message, Role};
use crate::session::{ChatSession, SendOutcome, block_banner};

const HELP: &str = "\
Commands:
  /retry     resend the last prompt after a failure
  /clear     delete all messages
  /history   print the conversation
  /status    show the remaining quota
  /stats     print metrics
  /help      show this help
  /quit      exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Retry,
    Clear,
    History,
    Status,
    Stats,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_line(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if !trimmed.starts_with('/') {
        return Command::Send(trimmed.to_string());
    }
    match trimmed.split_whitespace().next().unwrap_or_default() {
        "/retry" => Command::Retry,
        "/clear" => Command::Clear,
        "/history" => Command::History,
        "/status" => Command::Status,
        "/stats" => Command::Stats,
        "/help" | "/?" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

pub fn format_message(msg: &Message) -> String {
    let who = match msg.role {
        Role::User => "you",
        Role::Ai => "nekebot",
        Role::Error => "error",
        Role::Pending => "nekebot",
    };
    format!("[{}] {}: {}", msg.time_label(), who, msg.content)
}

pub fn format_status(status: &GovernorStatus) -> String {
    match status {
        GovernorStatus::Open { used, limit } => {
            format!("{} of {} messages used in this window.", used, limit)
        }
        GovernorStatus::Blocked { remaining } => block_banner(*remaining),
    }
}

/// Waits for the next Blocked -> Open transition. `false` once the session
/// side of the channel is gone.
async fn next_release(rx: &mut watch::Receiver<GovernorStatus>) -> bool {
    let mut was_blocked = rx.borrow_and_update().is_blocked();
    while rx.changed().await.is_ok() {
        let blocked = rx.borrow_and_update().is_blocked();
        if was_blocked && !blocked {
            return true;
        }
        was_blocked = blocked;
    }
    false
}

fn watch_cooldown(mut rx: watch::Receiver<GovernorStatus>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while next_release(&mut rx).await {
            println!("\nCooldown over, you can send messages again.");
        }
    })
}

fn prompt_marker() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

pub async fn run(session: &mut ChatSession) -> anyhow::Result<()> {
    println!("Nekebot. Ask anything, /help for commands.");
    for msg in session.messages() {
        println!("{}", format_message(msg));
    }

    let watcher = watch_cooldown(session.subscribe_status());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if let GovernorStatus::Blocked { remaining } = session.status().await {
            println!("{}", block_banner(remaining));
        }
        prompt_marker();

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_line(&line) {
            Command::Empty => {}
            Command::Send(prompt) => {
                match session.send(&prompt).await {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e @ (ChatError::EmptyPrompt | ChatError::PromptTooLong { .. })) => {
                        println!("{}", e)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Command::Retry => match session.retry().await {
                Ok(outcome) => print_outcome(&outcome),
                Err(ChatError::NothingToRetry) => println!("Nothing to retry."),
                Err(e) => return Err(e.into()),
            },
            Command::Clear => {
                session.clear()?;
                println!("Chat cleared.");
            }
            Command::History => {
                if session.messages().is_empty() {
                    println!("Start a conversation. Ask anything and Nekebot will respond here.");
                }
                for msg in session.messages() {
                    println!("{}", format_message(msg));
                }
            }
            Command::Status => println!("{}", format_status(&session.status().await)),
            Command::Stats => print!("{}", metrics::render()),
            Command::Help => println!("{}", HELP),
            Command::Quit => break,
            Command::Unknown(cmd) => println!("Unknown command {}, try /help", cmd),
        }
    }

    watcher.abort();
    Ok(())
}

fn print_outcome(outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Replied(msg) | SendOutcome::Failed(msg) => {
            println!("{}", format_message(msg))
        }
        SendOutcome::Denied(notice) => println!("{}", notice),
    }
}
