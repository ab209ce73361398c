use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use poker_event_core::config::{
    CoreConfig, DEFAULT_MATERIALIZER_CONSUMER, DEFAULT_STREAM_PREFIX,
};
use poker_event_core::server::{run_server, ServerConfig};

const DEFAULT_BIND: &str = "127.0.0.1:4000";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Parser)]
#[command(name = "event_core_server")]
#[command(about = "Serve the poker event core and run the hand materializer", long_about = None)]
struct Args {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "SERVER_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// SeaORM-compatible Postgres URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis URL backing event streams and sequence counters
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    redis_url: String,

    /// Stable consumer name for the materializer; keep it across restarts so
    /// pending entries are reclaimed
    #[arg(long, env = "MATERIALIZER_CONSUMER", default_value = DEFAULT_MATERIALIZER_CONSUMER)]
    consumer: String,

    /// Key prefix for every stream and counter
    #[arg(long, env = "EVENT_STREAM_PREFIX", default_value = DEFAULT_STREAM_PREFIX)]
    stream_prefix: String,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "SERVER_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json);
    run_server(build_config(args)).await
}

fn load_dotenv() {
    let manifest_env_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }
}

fn build_config(args: Args) -> ServerConfig {
    let mut core = CoreConfig::default();
    core.stream.prefix = args.stream_prefix;
    core.materializer.consumer = args.consumer;
    ServerConfig {
        bind: args.bind,
        database_url: args.database_url,
        redis_url: args.redis_url,
        core,
    }
}
