use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use raffle_execution::PrizeTable;
use raffle_server::{
    parse_host_list, Api, ConfigError, FairnessMode, MemoryStore, Raffle, RaffleConfig,
    RedisStore, ResultStore, Secret,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "raffle-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("raffle-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, env = "RAFFLE_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, env = "RAFFLE_PORT", default_value_t = 3000)]
    port: u16,

    /// Probability of a win per draw, strictly between 0 and 1.
    #[arg(long, env = "RAFFLE_WIN_PROBABILITY")]
    win_probability: Option<f64>,

    /// Secret mixed into every seed and code (required in production).
    #[arg(long, env = "RAFFLE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Comma-separated `host[:port]` entries allowed to call the endpoint.
    #[arg(long, env = "RAFFLE_ALLOWED_HOSTS")]
    allowed_hosts: Option<String>,

    /// Accept any origin under the preview suffix.
    #[arg(long, env = "RAFFLE_ALLOW_PREVIEWS", action = ArgAction::Set, default_value_t = true)]
    allow_previews: bool,

    #[arg(long, env = "RAFFLE_PREVIEW_SUFFIX")]
    preview_suffix: Option<String>,

    #[arg(long, env = "RAFFLE_RATE_WINDOW_SECS")]
    rate_window_secs: Option<u64>,

    #[arg(long, env = "RAFFLE_RATE_MAX_REQUESTS")]
    rate_max_requests: Option<usize>,

    /// Weighted prize list, `label:weight,...`.
    #[arg(long, env = "RAFFLE_PRIZES")]
    prizes: Option<String>,

    /// Outcome identity: network or client.
    #[arg(long, env = "RAFFLE_FAIRNESS")]
    fairness: Option<String>,

    /// Reject malformed request bodies instead of ignoring them.
    #[arg(long, env = "RAFFLE_STRICT_BODY", action = ArgAction::Set, default_value_t = false)]
    strict_body: bool,

    /// How long issued codes and stored results are kept.
    #[arg(long, env = "RAFFLE_CODE_TTL_SECS")]
    code_ttl_secs: Option<u64>,

    /// Redis URL for a shared result store (in-memory when omitted).
    #[arg(long, env = "RAFFLE_CACHE_REDIS_URL")]
    cache_redis_url: Option<String>,

    #[arg(long, env = "RAFFLE_CACHE_REDIS_PREFIX")]
    cache_redis_prefix: Option<String>,

    /// Per-IP request rate of the flood guard (disabled unless burst is also set).
    #[arg(long, env = "RATE_LIMIT_HTTP_PER_SEC")]
    http_rate_limit_per_second: Option<u64>,

    #[arg(long, env = "RATE_LIMIT_HTTP_BURST")]
    http_rate_limit_burst: Option<u32>,

    /// Maximum request body size in bytes (0 disables the limit).
    #[arg(long, env = "RAFFLE_HTTP_BODY_LIMIT_BYTES")]
    http_body_limit_bytes: Option<usize>,

    #[arg(long, env = "METRICS_AUTH_TOKEN", hide_env_values = true)]
    metrics_auth_token: Option<String>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn ensure_production_args(args: &Args, production: bool) -> Result<()> {
    if !production {
        return Ok(());
    }
    if non_empty(args.secret.as_deref()).is_none() {
        anyhow::bail!("Missing required env: RAFFLE_SECRET");
    }
    if non_empty(args.allowed_hosts.as_deref()).is_none() {
        anyhow::bail!("Missing required env: RAFFLE_ALLOWED_HOSTS");
    }
    Ok(())
}

fn build_config(args: &Args) -> Result<RaffleConfig> {
    let defaults = RaffleConfig::default();
    let prizes = match non_empty(args.prizes.as_deref()) {
        Some(value) => value.parse::<PrizeTable>().map_err(ConfigError::from)?,
        None => defaults.prizes.clone(),
    };
    let fairness = match non_empty(args.fairness.as_deref()) {
        Some(value) => value
            .parse::<FairnessMode>()
            .map_err(|err| anyhow::anyhow!("invalid fairness mode: {err}"))?,
        None => defaults.fairness,
    };
    let http_body_limit_bytes = match args.http_body_limit_bytes {
        Some(0) => None,
        Some(limit) => Some(limit),
        None => defaults.http_body_limit_bytes,
    };

    let config = RaffleConfig {
        win_probability: args.win_probability.unwrap_or(defaults.win_probability),
        secret: args
            .secret
            .clone()
            .map(Secret::new)
            .unwrap_or_else(|| defaults.secret.clone()),
        allowed_hosts: non_empty(args.allowed_hosts.as_deref())
            .map(parse_host_list)
            .unwrap_or_else(|| defaults.allowed_hosts.clone()),
        allow_preview_domains: args.allow_previews,
        preview_domain_suffix: args
            .preview_suffix
            .clone()
            .unwrap_or_else(|| defaults.preview_domain_suffix.clone()),
        rate_limit_window_secs: args
            .rate_window_secs
            .unwrap_or(defaults.rate_limit_window_secs),
        rate_limit_max_requests: args
            .rate_max_requests
            .unwrap_or(defaults.rate_limit_max_requests),
        fairness,
        prizes,
        strict_body: args.strict_body,
        code_ttl_secs: args.code_ttl_secs.unwrap_or(defaults.code_ttl_secs),
        http_rate_limit_per_second: args.http_rate_limit_per_second,
        http_rate_limit_burst: args.http_rate_limit_burst,
        http_body_limit_bytes,
        cache_redis_url: non_empty(args.cache_redis_url.as_deref()).map(str::to_string),
        cache_redis_prefix: args
            .cache_redis_prefix
            .clone()
            .unwrap_or_else(|| defaults.cache_redis_prefix.clone()),
        metrics_auth_token: non_empty(args.metrics_auth_token.as_deref()).map(str::to_string),
    };
    config.validate().context("invalid raffle configuration")?;
    Ok(config)
}

async fn serve<S: ResultStore>(config: RaffleConfig, store: S, addr: SocketAddr) -> Result<()> {
    let raffle = Arc::new(Raffle::new(config, store));
    let app = Api::new(raffle).router();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing()?;

    ensure_production_args(&args, is_production())?;
    let config = build_config(&args)?;
    if config.secret.is_default() {
        warn!("RAFFLE_SECRET not set; using the development secret");
    }
    info!(
        win_probability = config.win_probability,
        fairness = %config.fairness,
        prizes = %config.prizes,
        allowed_hosts = ?config.allowed_hosts,
        previews = ?config.preview_suffix(),
        "Raffle configured"
    );

    let addr = SocketAddr::new(args.host, args.port);
    match config.cache_redis_url.clone() {
        Some(url) => {
            let store = RedisStore::new(&url, config.cache_redis_prefix.clone(), config.code_ttl())
                .context("invalid redis url")?;
            info!("Using redis result store");
            serve(config, store, addr).await
        }
        None => serve(config, MemoryStore::new(), addr).await,
    }
}
