//! MCP OAuth Broker - Entry Point

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mcp_oauth_broker::{
    AuthorizationServer, DcrConfig, MemoryStorage, ServerConfig, SqlStorage, Storage,
    UpstreamConfig, server::transport,
};

#[derive(Parser, Debug)]
#[command(name = "mcp-oauth-broker")]
#[command(about = "OAuth 2.1 authorization server brokering MCP logins to an upstream IdP")]
#[command(version)]
struct Cli {
    /// Public base URL of this server (token issuer)
    #[arg(long, env = "OAUTH_ISSUER")]
    issuer: String,

    /// HTTP server port
    #[arg(long, default_value = "8080", env = "PORT")]
    port: u16,

    /// HMAC key for JWT access tokens (opaque tokens if unset)
    #[arg(long, env = "OAUTH_SIGNING_KEY", hide_env_values = true)]
    signing_key: Option<String>,

    /// SQLite database URL, e.g. sqlite://broker.db (in-memory storage if unset)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Upstream IdP realm URL, e.g. https://sso.example.com/realms/acme
    #[arg(long, env = "UPSTREAM_ISSUER")]
    upstream_issuer: Option<String>,

    /// This server's client id at the upstream IdP
    #[arg(long, env = "UPSTREAM_CLIENT_ID")]
    upstream_client_id: Option<String>,

    /// This server's client secret at the upstream IdP
    #[arg(long, env = "UPSTREAM_CLIENT_SECRET", hide_env_values = true)]
    upstream_client_secret: Option<String>,

    /// Callback URL registered at the upstream IdP (defaults to <issuer>/callback)
    #[arg(long, env = "UPSTREAM_REDIRECT_URI")]
    upstream_redirect_uri: Option<String>,

    /// Enable Dynamic Client Registration
    #[arg(long, env = "OAUTH_DCR_ENABLED")]
    dcr_enabled: bool,

    /// Comma-separated regex patterns for allowed redirect URIs (empty allows all)
    #[arg(long, env = "OAUTH_DCR_ALLOWED_REDIRECTS", value_delimiter = ',')]
    dcr_allowed_redirects: Vec<String>,

    /// Require PKCE for dynamically registered clients
    #[arg(long, env = "OAUTH_DCR_REQUIRE_PKCE")]
    dcr_require_pkce: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn upstream(&self) -> anyhow::Result<Option<UpstreamConfig>> {
        let Some(issuer) = self.upstream_issuer.as_deref() else {
            return Ok(None);
        };
        let client_id = self
            .upstream_client_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("UPSTREAM_CLIENT_ID is required with UPSTREAM_ISSUER"))?;
        let client_secret = self.upstream_client_secret.as_deref().unwrap_or_default();
        let redirect_uri = self.upstream_redirect_uri.clone().unwrap_or_else(|| {
            format!("{}/callback", self.issuer.trim_end_matches('/'))
        });
        Ok(Some(UpstreamConfig::new(issuer, client_id, client_secret, redirect_uri)))
    }

    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig::new(self.issuer.clone());
        config.signing_key = self.signing_key.as_ref().map(|k| k.as_bytes().to_vec());
        config.upstream = self.upstream()?;
        config.dcr = DcrConfig {
            enabled: self.dcr_enabled,
            allowed_redirect_patterns: self
                .dcr_allowed_redirects
                .iter()
                .map(|p| p.trim().to_owned())
                .filter(|p| !p.is_empty())
                .collect(),
            require_pkce: self.dcr_require_pkce,
            ..DcrConfig::default()
        };
        Ok(config)
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

async fn open_storage(database_url: Option<&str>) -> anyhow::Result<Arc<dyn Storage>> {
    match database_url {
        Some(url) => Ok(Arc::new(SqlStorage::connect(url).await?)),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage (data is lost on restart)");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        issuer = %cli.issuer,
        "Starting MCP OAuth broker"
    );

    let config = cli.server_config()?;
    if !config.has_signing_key() {
        tracing::warn!("OAUTH_SIGNING_KEY not set, issuing opaque access tokens");
    }
    if config.upstream.is_none() {
        tracing::warn!("No upstream IdP configured, /authorize will fail");
    }

    let storage = open_storage(cli.database_url.as_deref()).await?;
    let server = Arc::new(AuthorizationServer::new(config, storage)?);

    let cleanup = server.start_cleanup();
    let served = transport::run_http(Arc::clone(&server), cli.port).await;
    cleanup.stop().await;

    served
}
