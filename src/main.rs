mod api;
mod config;
mod models;
mod services;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use api::HttpBackend;
use config::{Config, APP_ID, APP_NAME};
use services::chat::certification_from_context;
use services::{ChatCore, Database, SendOutcome, SessionGate, SyncOutcome};

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    New(Option<&'a str>),
    List,
    Open(&'a str),
    Delete(&'a str),
    Clear,
    Certification(Option<&'a str>),
    Login,
    Logout,
    Quit,
    Send(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Send(line));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };
        let command = match name {
            "new" => Command::New(arg),
            "list" => Command::List,
            "open" => Command::Open(arg?),
            "delete" => Command::Delete(arg?),
            "clear" => Command::Clear,
            "cert" => Command::Certification(arg),
            "login" => Command::Login,
            "logout" => Command::Logout,
            "quit" | "exit" => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting {} ({}) against {}", APP_NAME, APP_ID, config.api_url);

    let db = Database::open_or_recover(&config.db_path())?;
    let backend = Arc::new(HttpBackend::new(
        config.api_url.clone(),
        config.token.clone(),
        config.request_timeout,
    )?);
    let session = Arc::new(SessionGate::new());
    let core = Arc::new(ChatCore::open(db, backend, session));
    let mut watcher = core.watch_session();

    print_active(&core);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = Command::parse(&line) else {
            println!("Unknown command: {}", line.trim());
            continue;
        };

        match command {
            Command::Quit => break,
            Command::New(label) => {
                core.create_conversation(label);
                print_active(&core);
            }
            Command::List => print_conversations(&core),
            Command::Open(id) => {
                let outcome = core.select_conversation(id).await;
                if outcome == SyncOutcome::UnknownConversation {
                    println!("No conversation {}", id);
                } else if let Some(notice) = outcome.notice() {
                    println!("! {}", notice);
                }
                print_active(&core);
            }
            Command::Delete(id) => {
                if !core.delete_conversation(id) {
                    println!("No conversation {}", id);
                }
                print_conversations(&core);
            }
            Command::Clear => {
                if let Some(id) = core.active_conversation_id() {
                    core.clear_conversation(&id);
                }
                print_active(&core);
            }
            Command::Certification(arg) => {
                let code = arg.map(|a| certification_from_context(a).unwrap_or_else(|| a.to_string()));
                core.set_certification(code);
                match core.certification() {
                    Some(code) => println!("Certification scope: {}", code),
                    None => println!("Certification scope cleared"),
                }
            }
            Command::Login => {
                core.start_session();
                watcher.abort();
                watcher = core.watch_session();
                print_active(&core);
            }
            Command::Logout => {
                println!("{}", core.sign_out());
            }
            Command::Send(text) => {
                if text.is_empty() {
                    continue;
                }
                // Replies land in their own conversation even if the user
                // switches away meanwhile.
                let core = Arc::clone(&core);
                let text = text.to_string();
                tokio::spawn(async move {
                    let outcome = core.send(&text).await;
                    report_send(&core, outcome);
                });
            }
        }
    }

    watcher.abort();
    Ok(())
}

fn report_send(core: &ChatCore, outcome: SendOutcome) {
    match outcome {
        SendOutcome::Settled { .. } => print_active(core),
        SendOutcome::Busy => println!("Still waiting for the previous reply"),
        SendOutcome::UnknownConversation => println!("No active conversation, use /new"),
        other => {
            if let Some(notice) = other.notice() {
                println!("! {}", notice);
            }
        }
    }
}

fn print_conversations(core: &ChatCore) {
    let active = core.active_conversation_id();
    for record in core.list_conversations() {
        let marker = if active.as_deref() == Some(record.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {}  {}",
            marker,
            record.id,
            record.created_at.format("%Y-%m-%d"),
            record.label
        );
    }
}

fn print_active(core: &ChatCore) {
    let snapshot = core.snapshot();
    let Some(active) = snapshot.active_id else {
        println!("(no active conversation)");
        return;
    };
    println!("--- {} ---", active);
    for msg in &snapshot.messages {
        let who = if msg.is_user { "you" } else { "assistant" };
        if msg.is_loading {
            println!("[{}] ...", who);
        } else {
            println!("[{}] {}", who, msg.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("hello there"), Some(Command::Send("hello there")));
        assert_eq!(Command::parse("/new"), Some(Command::New(None)));
        assert_eq!(Command::parse("/new  CTFL prep "), Some(Command::New(Some("CTFL prep"))));
        assert_eq!(Command::parse("/open abc"), Some(Command::Open("abc")));
        assert_eq!(Command::parse("/open"), None);
        assert_eq!(Command::parse("/cert"), Some(Command::Certification(None)));
        assert_eq!(Command::parse("/bogus"), None);
        assert_eq!(Command::parse("/quit"), Some(Command::Quit));
    }
}
