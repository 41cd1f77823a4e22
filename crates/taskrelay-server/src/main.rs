use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use taskrelay_server::{run_server, ServerConfig};
use taskrelay_telegram::DEFAULT_TELEGRAM_API_BASE;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "taskrelay-server",
    about = "Relays Bitrix24 task webhook events to Telegram, filtered by importance, authority, and urgency"
)]
struct ServerArgs {
    #[arg(long, env = "TASKRELAY_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// JSON file holding the leader roster and user-to-chat mapping,
    /// maintained out-of-band by taskrelay-mapctl.
    #[arg(long, env = "TASKRELAY_MAPPINGS_FILE", default_value = "user_mappings.json")]
    mappings_file: PathBuf,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: String,

    #[arg(long, env = "TELEGRAM_API_BASE", default_value = DEFAULT_TELEGRAM_API_BASE)]
    telegram_api_base: String,

    /// Bitrix24 portal domain used to build task deep links.
    #[arg(long, env = "BITRIX24_DOMAIN")]
    bitrix24_domain: Option<String>,

    /// Priority at or above this value counts as urgent (2 = high, 3 = critical).
    #[arg(long, env = "URGENT_PRIORITY_THRESHOLD", default_value_t = 2)]
    urgent_priority_threshold: i64,

    /// Look-ahead window within which a pending deadline counts as urgent.
    #[arg(long, env = "URGENT_DEADLINE_HOURS", default_value_t = 24)]
    urgent_deadline_hours: i64,

    #[arg(long, env = "TASKRELAY_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    request_timeout_ms: u64,
}

impl ServerArgs {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            mappings_file: self.mappings_file,
            telegram_bot_token: self.telegram_bot_token,
            telegram_api_base: self.telegram_api_base,
            portal_domain: self.bitrix24_domain,
            urgent_priority_threshold: self.urgent_priority_threshold,
            urgent_deadline_hours: self.urgent_deadline_hours,
            request_timeout_ms: self.request_timeout_ms,
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = ServerArgs::parse();
    run_server(args.into_config()).await
}
