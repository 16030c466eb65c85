use std::{io::BufRead, path::PathBuf, sync::Arc, thread};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use client_core::{
    config::{load_settings_from, SETTINGS_FILE},
    format_timestamp,
    transport::{self, Connection},
    ChatClient, ClientCommand, ClientDependencies, ClientEvent, ClientOptions, Message,
};
use shared::domain::ConversationSummary;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod input;

use input::{parse_line, Input, HELP};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    ws_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config, |key| std::env::var(key).ok());
    if let Some(v) = args.api_url {
        settings.api_url = v;
    }
    if let Some(v) = args.ws_url {
        settings.ws_url = v;
    }
    if let Some(v) = args.token {
        settings.access_token = Some(v);
    }
    if let Some(v) = args.user_id {
        settings.user_id = Some(v);
    }

    let session = Arc::new(settings.session().context("incomplete settings")?);
    let Connection {
        sink,
        inbound,
        tasks,
    } = transport::connect(&session).await?;

    let client = ChatClient::new(
        Arc::clone(&session),
        sink,
        ClientDependencies::http(Arc::clone(&session)),
        ClientOptions::from(&settings),
    );
    let printer = tokio::spawn(print_events(client.subscribe_events()));

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    commands_tx.send(ClientCommand::LoadConversations)?;
    // Blocking reader, never joined: the process exits once `run` returns.
    thread::spawn(move || read_commands(std::io::stdin().lock(), commands_tx));
    info!(user_id = %session.user_id, "cli: ready, type /help for commands");

    client.run(inbound, commands_rx).await;

    tasks.abort();
    printer.abort();
    Ok(())
}

fn read_commands(input: impl BufRead, commands: mpsc::UnboundedSender<ClientCommand>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("cli: failed to read stdin: {err}");
                break;
            }
        };
        match parse_line(&line) {
            Ok(Input::Command(command)) => {
                let shutdown = command == ClientCommand::Shutdown;
                if commands.send(command).is_err() || shutdown {
                    return;
                }
            }
            Ok(Input::Help) => println!("{HELP}"),
            Ok(Input::Empty) => {}
            Err(usage) => println!("{usage}"),
        }
    }
    let _ = commands.send(ClientCommand::Shutdown);
}

async fn print_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "cli: event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ClientEvent::ConversationsUpdated(summaries) => print_summaries(&summaries),
            ClientEvent::ConversationStarted { conversation_id } => {
                println!("* new conversation {conversation_id}")
            }
            ClientEvent::ConversationUpdated {
                conversation_id,
                partner,
                messages,
            } => {
                println!("--- {} ({conversation_id}) ---", partner.name);
                for message in &messages {
                    println!("{}", render_message(message, &partner.name));
                }
            }
            ClientEvent::ConversationClosed { conversation_id } => {
                println!("* closed {conversation_id}")
            }
            ClientEvent::MessagesRead { .. } => {}
            ClientEvent::CallStatusChanged(status) => println!("* call: {status}"),
            ClientEvent::IncomingCall {
                caller_id,
                caller_name,
            } => println!(
                "* incoming call from {} ({caller_id}), /accept or /reject {caller_id}",
                caller_name.as_deref().unwrap_or("unknown")
            ),
            ClientEvent::RemoteTrackAdded { peer_id, track } => {
                println!("* receiving {:?} from {peer_id}", track.kind)
            }
            ClientEvent::CallEnded { peer_id, reason } => {
                println!("* call with {peer_id} ended: {reason:?}")
            }
            ClientEvent::Error(err) => println!("! {err}"),
            ClientEvent::Disconnected => {
                println!("! disconnected");
                break;
            }
        }
    }
}

fn print_summaries(summaries: &[ConversationSummary]) {
    println!("--- conversations ---");
    let now = Local::now();
    for summary in summaries {
        let preview = summary
            .last_message
            .as_ref()
            .map(|last| {
                format!(
                    "{} [{}]",
                    last.content,
                    format_timestamp(last.created_at, now)
                )
            })
            .unwrap_or_default();
        let unread = if summary.unread_count > 0 {
            format!(" ({} unread)", summary.unread_count)
        } else {
            String::new()
        };
        println!(
            "{}  {}{unread}  {preview}",
            summary.conversation_id, summary.partner_name
        );
    }
}

fn render_message(message: &Message, partner_name: &str) -> String {
    let who = if message.is_sent_by_user {
        "you"
    } else {
        partner_name
    };
    let state = if message.is_pending() { " (sending)" } else { "" };
    format!(
        "[{}] {who}: {}{state}",
        format_timestamp(message.created_at, Local::now()),
        message.content
    )
}
