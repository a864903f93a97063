use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use lechat::channels::web::{GatewayState, start_server};
use lechat::config::{AssistantConfig, LogFormat};
use lechat::knowledge::{RouteIndex, RouteInfo, ScanSource};
use lechat::llm::{LlmProvider, MistralClient};

const DEFAULT_LOG_FILTER: &str = "lechat=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "lechat", version, about = "Documentation assistant backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the chat and suggestion API.
    Serve {
        /// Address to bind (overrides LECHAT_BIND).
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Route index produced by `lechat routes` (overrides LECHAT_ROUTES_FILE).
        #[arg(long)]
        routes_file: Option<PathBuf>,
    },

    /// Scan the documentation tree and write the route index.
    Routes {
        /// Directory holding documentation pages, mounted at `/`.
        #[arg(long, default_value = "src/app/(docs)")]
        docs_dir: PathBuf,

        /// Directory holding API reference pages, mounted at `/api`.
        #[arg(long, default_value = "src/app/(api)/api")]
        api_dir: PathBuf,

        /// Route the scan cannot discover, as `PATH=TITLE`. Repeatable.
        #[arg(
            long = "extra-route",
            value_parser = parse_extra_route,
            default_value = "/cookbooks/mistral-ocr-document_understanding=Mistral OCR Document Understanding"
        )]
        extra_routes: Vec<RouteInfo>,

        /// Output file.
        #[arg(long, env = "LECHAT_ROUTES_FILE", default_value = lechat::config::DEFAULT_ROUTES_FILE)]
        output: PathBuf,
    },
}

fn parse_extra_route(raw: &str) -> Result<RouteInfo, String> {
    let (path, title) = raw
        .split_once('=')
        .map_or((raw, None), |(p, t)| (p, Some(t.trim())));
    let path = path.trim();
    if !path.starts_with('/') {
        return Err(format!("route '{path}' must start with '/'"));
    }
    Ok(RouteInfo::new(path, title.filter(|t| !t.is_empty())))
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, routes_file } => {
            let mut config = AssistantConfig::resolve().context("invalid configuration")?;
            init_tracing(config.log_format);
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(routes_file) = routes_file {
                config.routes_file = routes_file;
            }
            serve(config).await
        }
        Command::Routes {
            docs_dir,
            api_dir,
            extra_routes,
            output,
        } => {
            init_tracing(LogFormat::resolve().context("invalid configuration")?);
            let sources = [ScanSource::new(docs_dir, ""), ScanSource::new(api_dir, "/api")];
            let index = RouteIndex::build(&sources, extra_routes);
            index.save(&output)?;
            tracing::info!(
                routes = index.route_count(),
                categories = index.categories.len(),
                output = %output.display(),
                "Wrote route index"
            );
            Ok(())
        }
    }
}

async fn serve(config: AssistantConfig) -> Result<()> {
    let index = match RouteIndex::load(&config.routes_file) {
        Ok(index) => {
            tracing::info!(
                routes = index.route_count(),
                file = %config.routes_file.display(),
                "Loaded route index"
            );
            index
        }
        Err(e) => {
            tracing::warn!(error = %e, "No usable route index; navigation is disabled");
            RouteIndex::empty()
        }
    };

    let provider: Option<Arc<dyn LlmProvider>> = match &config.api_key {
        Some(key) => {
            let client = MistralClient::new(&config.base_url, key.clone(), &config.model)?;
            tracing::info!(model = %client.model_name(), endpoint = %client.endpoint(), "LLM provider ready");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("MISTRAL_API_KEY is not set; chat requests will return 503");
            None
        }
    };

    let state = Arc::new(GatewayState::from_config(&config, provider, Arc::new(index)));
    start_server(config.bind, Arc::clone(&state), &config.allowed_origins).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    state.shutdown().await;
    Ok(())
}
