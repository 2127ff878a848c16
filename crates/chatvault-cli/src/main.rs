use std::path::PathBuf;

use anyhow::{Context, bail};
use chatvault::{MessageStore, Payload, RecordPatch, StoreConfig};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "chatvault")]
#[command(about = "Inspect and maintain a local chat message cache")]
#[command(version)]
struct Cli {
    /// Database file (defaults to CHATVAULT_DB_PATH, then chatvault.db)
    #[arg(short, long, env = "CHATVAULT_DB_PATH")]
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a message; PAYLOAD is a JSON object
    Save { conversation: String, payload: String },
    /// Print one message
    Get { id: i64 },
    /// Print every message of a conversation
    List { conversation: String },
    /// Print messages between two RFC 3339 instants (inclusive)
    Range {
        conversation: String,
        start: String,
        end: String,
        /// Keep only the newest N messages of the range
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Print the newest N messages of a conversation
    Latest { conversation: String, n: u32 },
    /// Merge JSON fields into a message
    Update {
        id: i64,
        fields: String,
        /// Move the message to a new RFC 3339 timestamp
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Delete one message
    Delete { id: i64 },
    /// Delete every message of a conversation
    DeleteConversation { conversation: String },
    /// List cached conversations, most recent first
    Conversations,
    /// Delete every message
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Init logging
    let filter = if cli.verbose {
        "chatvault=debug,chatvault_db=debug"
    } else {
        "chatvault=info,chatvault_db=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let mut config = StoreConfig::from_env();
    if let Some(db) = cli.db {
        config.path = db;
    }
    // One-shot commands never need the reader pool.
    config.readers = 0;

    let store = chatvault::init(&config)
        .await
        .with_context(|| format!("opening {}", config.path.display()))?;

    run(store, cli.command).await
}

async fn run(store: &MessageStore, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Save {
            conversation,
            payload,
        } => {
            let record = store.save(conversation, parse_object(&payload)?).await?;
            print_json(&record)?;
        }
        Command::Get { id } => match store.get_by_id(id).await? {
            Some(record) => print_json(&record)?,
            None => bail!("message {} not found", id),
        },
        Command::List { conversation } => {
            for record in store.get_by_conversation(conversation).await? {
                print_json(&record)?;
            }
        }
        Command::Range {
            conversation,
            start,
            end,
            limit,
        } => {
            let records = store
                .get_by_conversation_and_time_range(
                    conversation,
                    parse_instant(&start)?,
                    parse_instant(&end)?,
                    limit,
                )
                .await?;
            for record in records {
                print_json(&record)?;
            }
        }
        Command::Latest { conversation, n } => {
            for record in store.latest(conversation, n).await? {
                print_json(&record)?;
            }
        }
        Command::Update {
            id,
            fields,
            timestamp,
        } => {
            let mut patch = RecordPatch::from(parse_object(&fields)?);
            if let Some(raw) = timestamp {
                patch = patch.with_timestamp(parse_instant(&raw)?);
            }
            store.update(id, patch).await?;
        }
        Command::Delete { id } => store.delete_by_id(id).await?,
        Command::DeleteConversation { conversation } => {
            store.delete_by_conversation(conversation).await?
        }
        Command::Conversations => {
            for summary in store.conversations().await? {
                print_json(&summary)?;
            }
        }
        Command::Clear => {
            store.clear().await?;
            info!("Message store cleared");
        }
    }
    Ok(())
}

fn parse_object(raw: &str) -> anyhow::Result<Payload> {
    match serde_json::from_str::<Value>(raw).context("invalid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {}", other),
    }
}

fn parse_instant(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    chatvault::timestamp::parse(raw).with_context(|| format!("invalid RFC 3339 timestamp '{}'", raw))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_range_with_limit() {
        let cli = Cli::try_parse_from([
            "chatvault",
            "--db",
            "cache.db",
            "range",
            "room1",
            "2026-01-01T00:00:00Z",
            "2026-12-31T00:00:00Z",
            "--limit",
            "20",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("cache.db")));
        assert!(matches!(cli.command, Command::Range { limit: Some(20), .. }));
    }

    #[test]
    fn payload_must_be_an_object() {
        assert!(parse_object(r#"{"text":"hi"}"#).is_ok());
        assert!(parse_object("[1,2]").is_err());
        assert!(parse_object("not json").is_err());
    }
}
