//! `portier`: terminal chat client for a Portier server.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use portier_client::{ChatSession, ClientError, ServerClient};
use portier_shared::constants::APP_NAME;
use portier_shared::models::CHAT_MODELS;
use portier_shared::tokens::format_tokens;
use portier_shared::types::Role;
use portier_store::Database;

#[derive(Debug, Parser)]
#[command(name = "portier", version, about = "Terminal chat client for a Portier server")]
struct Args {
    /// Base URL of the Portier server
    #[arg(long, env = "PORTIER_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Conversation database (defaults to the platform data directory)
    #[arg(long)]
    db: Option<PathBuf>,
}

type Input = Lines<BufReader<Stdin>>;

const HELP: &str = "\
Commands:
  /new                   start a new conversation
  /list                  list stored conversations, newest first
  /load <id>             open a stored conversation
  /rename <name>         rename the current conversation
  /delete [id]           delete a conversation (default: current)
  /clear                 delete every conversation
  /model [id]            show or select the model
  /regen                 drop the last message and ask again
  /remove <message-id>   remove one message
  /export <file>         export the current conversation (.json or transcript)
  /import <file>         import an exported .json conversation
  /tokens                show total token usage
  /quit                  exit
Anything else is sent as a message. Ctrl+C cancels a pending reply.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let db = match &args.db {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("failed to open the conversation database")?;
    info!(path = ?db.path(), "conversation database opened");

    let client = ServerClient::new(&args.server)?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    println!("{APP_NAME} on {}", args.server);
    if !authorize(&client, &mut input).await? {
        return Ok(());
    }

    let session = ChatSession::new(db, Arc::new(client));
    println!("Model: {}. Type /help for commands.", session.model().name);

    loop {
        prompt("> ")?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let outcome = match line.strip_prefix('/') {
            Some(command) => match run_command(&session, command).await {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => Ok(()),
                Err(e) => Err(e),
            },
            None => send(&session, line).await,
        };
        if let Err(e) = outcome {
            eprintln!("error: {e}");
        }
    }

    Ok(())
}

/// Ask for the password until the server lets us in. Returns `false` when
/// the caller is locked out or input ends.
async fn authorize(client: &ServerClient, input: &mut Input) -> anyhow::Result<bool> {
    let status = client
        .auth_status()
        .await
        .context("failed to reach the server")?;
    debug!(reason = %status.reason, "authorization status");
    if status.success {
        println!("{}", status.message);
        return Ok(true);
    }
    if status.reason == "rate-limited" {
        eprintln!("{}", status.message);
        return Ok(false);
    }

    println!("Append a number of minutes to the password to keep the server unlocked.");
    loop {
        prompt("Password: ")?;
        let Some(line) = input.next_line().await? else {
            return Ok(false);
        };
        let resp = client.submit_password(line.trim()).await?;
        println!("{}", resp.message);
        if resp.success {
            return Ok(true);
        }
        if resp.reason == "rate-limited" {
            return Ok(false);
        }
    }
}

/// Send a message, cancelling the reply on Ctrl+C, then print the answer.
async fn send(session: &ChatSession, content: &str) -> Result<(), ClientError> {
    let before = session.conversation().messages.len();

    let pending = session.send(content);
    tokio::pin!(pending);
    tokio::select! {
        result = &mut pending => result?,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            pending.await?;
            println!("(cancelled)");
        }
    }

    let conversation = session.conversation();
    for message in conversation.messages.iter().skip(before) {
        if message.role == Role::Assistant {
            println!("\n{}\n", message.content);
        }
    }
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

async fn run_command(session: &ChatSession, line: &str) -> Result<Flow, ClientError> {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "quit" | "exit" => return Ok(Flow::Quit),
        "help" => println!("{HELP}"),
        "new" => {
            let id = session.new_conversation()?;
            println!("Started conversation {id}");
        }
        "list" => {
            let current = session.conversation_id();
            for conversation in session.history()? {
                let marker = if current.as_deref() == Some(conversation.id.as_str()) {
                    '*'
                } else {
                    ' '
                };
                println!(
                    "{marker} {}  {}  ({} messages, {})",
                    conversation.id,
                    conversation.name,
                    conversation.messages.len(),
                    conversation.created_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        "load" => {
            session.load(arg)?;
            let conversation = session.conversation();
            println!("# {}", conversation.name);
            for message in &conversation.messages {
                println!("[{}] {}: {}", message.id, message.role, message.content);
            }
        }
        "rename" => match session.conversation_id() {
            Some(id) if !arg.is_empty() => session.rename(&id, arg)?,
            Some(_) => println!("usage: /rename <name>"),
            None => println!("No conversation is open"),
        },
        "delete" => {
            let id = match (arg.is_empty(), session.conversation_id()) {
                (false, _) => arg.to_string(),
                (true, Some(id)) => id,
                (true, None) => {
                    println!("No conversation is open");
                    return Ok(Flow::Continue);
                }
            };
            if session.delete(&id)? {
                println!("Deleted {id}");
            } else {
                println!("No conversation {id}");
            }
        }
        "clear" => {
            session.clear_all()?;
            println!("All conversations deleted");
        }
        "model" if arg.is_empty() => {
            let selected = session.model();
            for model in CHAT_MODELS {
                let marker = if model.id == selected.id { '*' } else { ' ' };
                println!("{marker} {} (max {} tokens)", model.id, model.max_limit);
            }
        }
        "model" => {
            let model = session.select_model(arg)?;
            println!("Model: {}", model.name);
        }
        "regen" => {
            session.regenerate().await?;
            let conversation = session.conversation();
            if let Some(reply) = conversation.messages.last().filter(|m| m.role == Role::Assistant) {
                println!("\n{}\n", reply.content);
            }
        }
        "remove" => match arg.parse::<u32>() {
            Ok(id) if session.remove_message(id)? => println!("Removed message {id}"),
            Ok(id) => println!("No message {id}"),
            Err(_) => println!("usage: /remove <message-id>"),
        },
        "export" => {
            let Some(id) = session.conversation_id() else {
                println!("No conversation is open");
                return Ok(Flow::Continue);
            };
            if arg.is_empty() {
                println!("usage: /export <file>");
                return Ok(Flow::Continue);
            }
            let body = if arg.ends_with(".json") {
                session.export_json(&id)?
            } else {
                session.export_transcript(&id)?
            };
            match tokio::fs::write(arg, body).await {
                Ok(()) => println!("Exported to {arg}"),
                Err(e) => println!("Could not write {arg}: {e}"),
            }
        }
        "import" => match tokio::fs::read_to_string(arg).await {
            Ok(raw) => {
                let id = session.import(&raw)?;
                println!("Imported as {id}");
            }
            Err(e) => println!("Could not read {arg}: {e}"),
        },
        "tokens" => println!("{}", format_tokens(session.total_tokens()?)),
        other => println!("Unknown command /{other}. Type /help for commands."),
    }

    Ok(Flow::Continue)
}

fn prompt(text: &str) -> std::io::Result<()> {
    print!("{text}");
    std::io::stdout().flush()
}
