use std::path::Path;
use std::sync::Arc;

use chatsync::{Draft, Entity, Identity, LogNotifier, MediaAsset, SyncClient, SyncConfig, SyncError};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing user ID; pass --user-id or set CHATSYNC_USER_ID")]
    MissingUserId,
    #[error("missing token; pass --token or set CHATSYNC_TOKEN")]
    MissingToken,
    #[error("{} [{}]", .0, .0.error_code())]
    Sync(#[from] SyncError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "chatsync-cli", about = "Chat sync client: socket listener and REST helpers")]
struct Cli {
    /// REST base URL. Overrides `CHATSYNC_API_URL` from the sync config.
    #[arg(long)]
    api_url: Option<String>,

    /// Socket base URL. Derived from the API URL when absent.
    #[arg(long)]
    ws_url: Option<String>,

    #[arg(long, env = "CHATSYNC_USER_ID")]
    user_id: Option<String>,

    #[arg(long, env = "CHATSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect all sockets and print every inbound event until Ctrl-C.
    Listen,
    /// List the user's chats.
    Chats,
    /// Send a message to a chat.
    Send {
        chat_id: String,
        #[arg(default_value = "")]
        content: String,
        /// Attach a local file (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Print one page of a chat's messages.
    History {
        chat_id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Print the call history of a chat.
    Calls { chat_id: String },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url.trim_end_matches('/').to_owned();
    }
    if cli.ws_url.is_some() {
        config.ws_url = cli.ws_url;
    }
    let identity = Identity::new(
        cli.user_id.ok_or(CliError::MissingUserId)?,
        cli.token.ok_or(CliError::MissingToken)?,
    );
    tracing::info!(api_url = %config.api_url, user_id = %identity.user_id, "cli: starting");
    let client = SyncClient::new(identity, &config, Arc::new(LogNotifier))?;

    match cli.command {
        Command::Listen => run_listen(&client).await,
        Command::Chats => run_chats(&client).await,
        Command::Send { chat_id, content, files } => run_send(&client, &chat_id, content, &files).await,
        Command::History { chat_id, page } => run_history(&client, &chat_id, page).await,
        Command::Calls { chat_id } => {
            let rows = client.calls().history(&chat_id).await?;
            print_json(&Value::Array(rows))
        }
    }
}

async fn run_listen(client: &SyncClient) -> Result<(), CliError> {
    let mut events = client.events();
    let mut notices = client.notices();
    client.start();
    eprintln!("listening as {}; Ctrl-C to stop", client.identity().user_id);

    loop {
        tokio::select! {
            biased;
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("! {}", notice.text()),
                Err(RecvError::Lagged(missed)) => eprintln!("! {missed} notices dropped"),
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => println!("{}", frames::encode_server_event(&event)),
                Err(RecvError::Lagged(missed)) => eprintln!("! {missed} events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown();
    Ok(())
}

async fn run_chats(client: &SyncClient) -> Result<(), CliError> {
    let rest = client.rest().ok_or_else(|| SyncError::State("no REST client configured".into()))?;
    let chats = rest.list_chats().await?;
    print_json(&Value::Array(chats))
}

async fn run_send(client: &SyncClient, chat_id: &str, content: String, files: &[String]) -> Result<(), CliError> {
    let draft = files
        .iter()
        .fold(Draft::text(content), |draft, path| draft.with_attachment(media_asset(path)));
    let message = client.messages().create(chat_id, draft).await?;
    print_json(&entity_json(&message))
}

async fn run_history(client: &SyncClient, chat_id: &str, page: u32) -> Result<(), CliError> {
    let added = client.messages().load(chat_id, page).await?;
    let rows: Vec<Value> = client.messages().entities(chat_id).iter().map(entity_json).collect();
    eprintln!("{added} messages on page {page}");
    print_json(&Value::Array(rows))
}

fn entity_json(entity: &Entity) -> Value {
    json!({
        "id": entity.id,
        "authorId": entity.author_id,
        "content": entity.content,
        "attachments": entity.attachments,
        "createdAt": entity.created_at,
        "updatedAt": entity.updated_at,
        "likeCount": entity.like_count,
        "deliveredAt": entity.delivered_at,
        "readAt": entity.read_at,
    })
}

/// Describe a local file the way a media picker would.
fn media_asset(path: &str) -> MediaAsset {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_owned();
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let mime = match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    };
    MediaAsset { uri: format!("file://{path}"), mime: mime.to_owned(), name }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_asset_guesses_mime_from_extension() {
        let asset = media_asset("/tmp/photos/Beach.JPG");
        assert_eq!(asset.name, "Beach.JPG");
        assert_eq!(asset.mime, "image/jpeg");
        assert_eq!(asset.uri, "file:///tmp/photos/Beach.JPG");

        assert_eq!(media_asset("notes").mime, "application/octet-stream");
    }

    #[test]
    fn send_requires_chat_id() {
        let parsed = Cli::try_parse_from(["chatsync-cli", "--user-id", "u1", "--token", "t", "send"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "chatsync-cli", "--user-id", "u1", "--token", "t", "send", "c1", "hi", "--file", "a.png",
        ])
        .expect("parse");
        let Command::Send { chat_id, content, files } = parsed.command else {
            panic!("expected send");
        };
        assert_eq!(chat_id, "c1");
        assert_eq!(content, "hi");
        assert_eq!(files, ["a.png"]);
    }
}
