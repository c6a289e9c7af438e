use crate::client::ChatClient;
use crate::model::{Conversation, Message, MessageOrigin, MessageStatus};
use crate::notify::Notification;
use colored::*;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New(String),
    Open(String),
    List,
    Show,
    Offline,
    Online,
    Pending,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }
        if !trimmed.starts_with('/') {
            return Command::Send(line.trim_end_matches(['\r', '\n']).to_string());
        }

        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();

        match (cmd, arg.is_empty()) {
            ("/new", false) => Command::New(arg.to_string()),
            ("/open", false) => Command::Open(arg.to_string()),
            ("/list", _) => Command::List,
            ("/show", _) => Command::Show,
            ("/offline", _) => Command::Offline,
            ("/online", _) => Command::Online,
            ("/pending", _) => Command::Pending,
            ("/help", _) => Command::Help,
            ("/quit", _) | ("/exit", _) => Command::Quit,
            _ => Command::Unknown(trimmed.to_string()),
        }
    }
}

/// Prints messages of the active conversation as they appear or change status
#[derive(Default)]
struct Renderer {
    seen: HashMap<String, MessageStatus>,
}

impl Renderer {
    fn render_changes(&mut self, active: Option<&str>, snapshot: &[Conversation]) {
        let Some(conv) = active.and_then(|id| snapshot.iter().find(|c| c.id == id)) else {
            return;
        };
        for message in &conv.messages {
            if self.seen.get(&message.id) != Some(&message.status) {
                self.seen.insert(message.id.clone(), message.status);
                println!("{}", format_message(message));
            }
        }
    }
}

fn format_message(message: &Message) -> String {
    let time = chrono::DateTime::from_timestamp_millis(message.timestamp)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let who = match message.origin {
        MessageOrigin::Mine => "you".green().bold(),
        MessageOrigin::Bot => "bot".magenta().bold(),
        MessageOrigin::Other => message.sender_id.as_str().cyan(),
    };
    let badge = match message.status {
        MessageStatus::Sent => message.status.badge().dimmed(),
        MessageStatus::Sending => message.status.badge().yellow(),
        MessageStatus::Queued => message.status.badge().yellow().bold(),
        MessageStatus::Failed => message.status.badge().red().bold(),
    };
    format!("{} {}: {} [{}]", time.dimmed(), who, message.text, badge)
}

fn print_help() {
    println!("{}", "⚡ chatsync".bright_cyan().bold());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}               Send to the active conversation", "<text>".cyan());
    println!("  {} <id>            Create a conversation", "/new".cyan());
    println!("  {} <id>           Switch to a conversation and mark it read", "/open".cyan());
    println!("  {}                List conversations", "/list".cyan());
    println!("  {}                Show the active conversation", "/show".cyan());
    println!("  {}    Toggle the offline simulation", "/offline | /online".cyan());
    println!("  {}             Show queued messages", "/pending".cyan());
    println!("  {}                Quit", "/quit".cyan());
}

async fn print_list(client: &ChatClient) {
    let active = client.active_conversation().await;
    let summaries = client.summaries().await;
    if summaries.is_empty() {
        println!("{}", "No conversations yet. Try /new general".dimmed());
    }
    for s in summaries {
        let marker = if active.as_deref() == Some(s.id.as_str()) { "▶" } else { " " };
        let unread = if s.unread_count > 0 {
            format!(" ({} unread)", s.unread_count).yellow().bold().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {}{}  {}",
            marker.cyan(),
            s.title.bright_white(),
            unread,
            s.last_message_preview.dimmed()
        );
    }
}

/// Interactive loop: stdin commands, store updates and notifications
pub async fn run(client: ChatClient) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut notes = client.subscribe_notifications();
    let mut snapshots = client.subscribe_snapshots();
    let mut renderer = Renderer::default();

    println!(
        "{} Connected as {}. Type {} for commands.",
        "✓".green().bold(),
        client.client_id.cyan(),
        "/help".yellow()
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Command::Send(text) => {
                        if client.send(&text).await.is_none() && !text.trim().is_empty() {
                            eprintln!("{} No active conversation. Use /new <id>", "✗".red().bold());
                        }
                    }
                    Command::New(id) => {
                        client.create_conversation(&id).await;
                        client.select_conversation(&id).await;
                        println!("{} Opened {}", "✓".green(), id.cyan());
                    }
                    Command::Open(id) => {
                        client.select_conversation(&id).await;
                        renderer = Renderer::default();
                        let snap = snapshots.borrow().clone();
                        renderer.render_changes(Some(&id), &snap);
                    }
                    Command::List => print_list(&client).await,
                    Command::Show => {
                        let active = client.active_conversation().await;
                        if let Some(conv) = match active {
                            Some(id) => client.conversation(&id).await,
                            None => None,
                        } {
                            println!("{}", conv.title.bright_white().bold());
                            for m in &conv.messages {
                                println!("{}", format_message(m));
                            }
                        }
                    }
                    Command::Offline => {
                        client.set_online(false).await;
                    }
                    Command::Online => {
                        if let Some(report) = client.set_online(true).await {
                            println!(
                                "{} Retried {} ({} delivered, {} failed)",
                                "↻".cyan(),
                                report.attempted,
                                report.delivered,
                                report.failed
                            );
                        }
                    }
                    Command::Pending => {
                        let items = client.pending_items().await;
                        println!("{} pending", items.len().to_string().yellow());
                        for item in items {
                            println!(
                                "  {} {} (attempts: {})",
                                item.payload.conversation_id.cyan(),
                                item.payload.text,
                                item.attempts
                            );
                        }
                    }
                    Command::Help => print_help(),
                    Command::Quit => break,
                    Command::Empty => {}
                    Command::Unknown(cmd) => {
                        eprintln!("{} Unknown command: {}", "✗".red().bold(), cmd.red());
                    }
                }
            }
            note = notes.recv() => {
                match note {
                    Ok(note) => print_notification(&note),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                let active = client.active_conversation().await;
                renderer.render_changes(active.as_deref(), &snap);
            }
        }
    }

    client.shutdown();
    Ok(())
}

fn print_notification(note: &Notification) {
    let text = note.to_string();
    match note {
        Notification::ConnectFailed(_)
        | Notification::ConnectionError(_)
        | Notification::RetryFailed
        | Notification::BotReplyFailed => eprintln!("{} {}", "✗".red().bold(), text.red()),
        _ => eprintln!("{} {}", "•".yellow(), text.yellow()),
    }
}
