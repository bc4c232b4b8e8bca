mod commands;
mod render;
mod repl;

use std::time::Duration;

use chatbot_api::ChatOptions;
use chatbot_core::ChatSettings;
use chatbot_http::{ClientConfig, HttpClient};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatbot", about = "Terminal client for the chatbot agent service.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Root of the backend API routes.
    #[arg(long, env = "CHATBOT_BASE_URL", default_value = chatbot_http::DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Owner of the sessions this client creates and lists.
    #[arg(long, env = "CHATBOT_USER_ID", default_value = chatbot_http::DEFAULT_USER_ID, global = true)]
    user_id: String,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Chat interactively (default).
    Chat,
    /// Show the backend's model and tool settings.
    Config,
    /// List your sessions.
    Sessions,
    /// Print the transcript of a session.
    History { session: String },
    /// Delete a session and its messages.
    Delete { session: String },
}

#[derive(Args)]
struct ChatArgs {
    /// Resume an existing session instead of starting a new one.
    #[arg(long)]
    session: Option<String>,

    /// Wait for complete replies instead of streaming them.
    #[arg(long)]
    no_stream: bool,

    /// Ask the agent not to call tools.
    #[arg(long)]
    no_tools: bool,

    /// Let the agent see earlier messages of the session.
    #[arg(long)]
    memory: bool,

    /// How often streamed text is redrawn, in milliseconds.
    #[arg(long, default_value_t = 16)]
    flush_ms: u64,
}

impl ChatArgs {
    fn settings(&self) -> ChatSettings {
        ChatSettings {
            streaming: !self.no_stream,
            options: ChatOptions {
                enable_tool_calls: !self.no_tools,
                enable_memory: self.memory,
            },
            flush_interval: Duration::from_millis(self.flush_ms),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env first so clap's env fallbacks can see it.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    let client = HttpClient::new(ClientConfig {
        base_url: cli.base_url,
        user_id: cli.user_id,
        ..Default::default()
    })?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => repl::run(client, cli.chat.settings(), cli.chat.session).await,
        Command::Config => commands::print_config(&client).await,
        Command::Sessions => commands::list_sessions(&client).await,
        Command::History { session } => commands::print_history(&client, &session).await,
        Command::Delete { session } => commands::delete_session(&client, &session).await,
    }
}
