//! # Sandbox Node
//!
//! Runs the SDK end to end against the in-process ledger: a guarded mint and its
//! replay, pool registration, token fragmentation followed by sequential merges, and
//! volume estimation from swap counters.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin sandbox_node -- --owner alice --fragments 4
//! cargo run --bin sandbox_node --features observability -- --keep-alive
//! ```
//!
//! With `--keep-alive` the process stays up until Ctrl+C (useful for scraping metrics).

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::signal;

use swap_ledger_sdk::{
    errors::SdkResult,
    fingerprint::RequestFingerprint,
    idempotency::IdempotencyGuard,
    idempotency_cache::{CacheError, CachedResponse, IdempotencyCache, InMemoryIdempotencyCache},
    ledger::LedgerGateway,
    pool_directory::PoolDirectory,
    sandbox_ledger::InMemoryLedger,
    settings::{LogFormat, Settings},
    token_merge::SequentialMergeCoordinator,
    token_mint::{MintTokensCommand, TokenMintService},
    volume::{SwapCounterRegistry, VolumeEstimator},
};
#[cfg(feature = "redis")]
use swap_ledger_sdk::idempotency_cache::{RedisCacheConfig, RedisIdempotencyCache};

#[derive(Parser, Debug)]
#[command(name = "sandbox_node", about = "Runs the swap ledger SDK against an in-process ledger")]
struct Args {
    /// Optional TOML config file (defaults to ./Config.toml when present)
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[arg(long, default_value = "issuer")]
    issuer: String,

    #[arg(long, default_value = "alice")]
    owner: String,

    #[arg(long, default_value = "ETH")]
    symbol_a: String,

    #[arg(long, default_value = "USDC")]
    symbol_b: String,

    /// Extra fragments seeded per symbol before merging
    #[arg(long, default_value_t = 3)]
    fragments: u32,

    /// Swaps recorded for the volume estimate
    #[arg(long, default_value_t = 25)]
    swaps: u32,

    /// Prometheus listener (observability feature)
    #[arg(long, default_value = "0.0.0.0:9000")]
    metrics_addr: String,

    /// Stay alive after the scripted run until Ctrl+C
    #[arg(long)]
    keep_alive: bool,
}

fn init_logging(settings: &Settings) {
    #[cfg(feature = "observability")]
    {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings.log.level.as_str()));
        match settings.log.format {
            LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
            LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        }
    }

    #[cfg(not(feature = "observability"))]
    {
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(settings.log.level.as_str()),
        );
        if settings.log.format == LogFormat::Json {
            builder.format(|buf, record| {
                use std::io::Write;
                writeln!(
                    buf,
                    "{}",
                    serde_json::json!({
                        "level": record.level().to_string(),
                        "target": record.target(),
                        "message": record.args().to_string(),
                    })
                )
            });
        }
        builder.init();
    }
}

#[cfg(feature = "observability")]
fn init_metrics(addr: &str) -> Result<()> {
    let addr: std::net::SocketAddr = addr.parse().context("invalid --metrics-addr")?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    swap_ledger_sdk::metrics::describe_metrics();
    println!("✅ Prometheus exporter listening on {}", addr);
    Ok(())
}

#[cfg(not(feature = "observability"))]
fn init_metrics(_addr: &str) -> Result<()> {
    Ok(())
}

async fn build_cache(settings: &Settings) -> Result<Arc<dyn IdempotencyCache>> {
    match settings.idempotency.backend.as_str() {
        #[cfg(feature = "redis")]
        "redis" => {
            let cache = RedisIdempotencyCache::new(RedisCacheConfig {
                url: settings.redis.url.clone(),
                key_prefix: settings.redis.key_prefix.clone(),
            })
            .await?;
            cache.health_check().await?;
            Ok(Arc::new(cache))
        }
        "memory" => Ok(Arc::new(InMemoryIdempotencyCache::new())),
        other => anyhow::bail!(
            "unsupported idempotency backend '{}' (redis requires the \"redis\" feature)",
            other
        ),
    }
}

/// Maps a mint result onto the response the HTTP layer would send.
fn mint_response(result: SdkResult<swap_ledger_sdk::token_mint::MintTokensResponse>) -> SdkResult<CachedResponse> {
    let response = match result {
        Ok(body) => CachedResponse::json(200, &body),
        Err(e) => CachedResponse::json(e.http_status(), &e.to_api_error()),
    };
    response.map_err(|e| CacheError::from(e).into())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::from_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Settings::new()?,
    };
    init_logging(&settings);
    init_metrics(&args.metrics_addr)?;

    println!("🚀 Starting Sandbox Node");
    println!("═══════════════════════════════════════════════════════════════════\n");

    // 1. Collaborators
    let ledger = Arc::new(InMemoryLedger::new());
    let gateway: Arc<dyn LedgerGateway> = ledger.clone();
    let cache = build_cache(&settings).await?;
    let guard = IdempotencyGuard::new(cache)
        .with_ttl(settings.idempotency.ttl())
        .with_in_flight_ttl(settings.idempotency.in_flight_ttl())
        .with_max_key_length(settings.idempotency.max_key_length);
    let mint_service = TokenMintService::new(gateway.clone());
    let merger = SequentialMergeCoordinator::new(gateway.clone())
        .with_enabled(settings.merge.auto_merge_enabled);
    let directory = PoolDirectory::new();
    let swaps = Arc::new(SwapCounterRegistry::new());
    let estimator = VolumeEstimator::new(swaps.clone())
        .with_average_swap_size(settings.volume.average_swap_size);
    println!("✅ Sandbox ledger and services ready (backend: {})", settings.idempotency.backend);

    // 2. Guarded mint, then the same request again
    let command = MintTokensCommand {
        issuer_party: args.issuer.clone(),
        owner_party: args.owner.clone(),
        symbol_a: args.symbol_a.clone(),
        amount_a: Decimal::new(10, 0),
        symbol_b: args.symbol_b.clone(),
        amount_b: Decimal::new(25_000, 0),
    };
    let body = serde_json::to_vec(&command)?;
    let fingerprint = RequestFingerprint::derive("POST", "/api/mint", Some(args.owner.as_str()), &body);
    let idempotency_key = format!("mint-{}", args.owner);

    for attempt in 1..=2 {
        let result = guard
            .guard_keyed(Some(idempotency_key.as_str()), &fingerprint, || async {
                mint_response(mint_service.mint_pair(&command).await)
            })
            .await?;
        println!(
            "✅ Mint attempt {}: status={} replayed={} body={}",
            attempt,
            result.response.status,
            result.replayed,
            String::from_utf8_lossy(&result.response.body)
        );
    }
    println!("   ledger creates so far: {}", ledger.create_calls());

    // 3. Pools
    let pool_id = format!("{}-{}", args.symbol_a, args.symbol_b);
    ledger
        .seed_pool(&pool_id, &args.issuer, &args.symbol_a, &args.symbol_b)
        .await;
    let applied = directory.refresh_from_ledger(gateway.as_ref()).await?;
    println!(
        "✅ Pool directory refreshed: {} applied, parties={:?}",
        applied,
        directory.snapshot().parties()
    );

    // 4. Fragment holdings the way swaps do, then fold them back
    for i in 1..=args.fragments {
        ledger
            .seed_token(&args.issuer, &args.owner, &args.symbol_a, Decimal::new(i64::from(i), 1))
            .await;
        ledger
            .seed_token(&args.issuer, &args.owner, &args.symbol_b, Decimal::new(i64::from(i) * 100, 0))
            .await;
    }
    let outcomes = merger
        .merge_symbols(&args.owner, &[args.symbol_a.as_str(), args.symbol_b.as_str()])
        .await;
    for (symbol, outcome) in &outcomes {
        let holdings = ledger.tokens_of(&args.owner, symbol).await;
        println!(
            "✅ Merge {}: {:?} ({} holding(s), total {})",
            symbol,
            outcome,
            holdings.len(),
            holdings.iter().map(|t| t.amount).sum::<Decimal>()
        );
    }
    println!("   exercises: {}", ledger.exercise_calls());

    // 5. Volume
    for i in 0..args.swaps {
        if i % 2 == 0 {
            swaps.record_swap(&args.symbol_a, &args.symbol_b);
        } else {
            swaps.record_swap(&args.symbol_b, &args.symbol_a);
        }
    }
    println!(
        "✅ Estimated volume {}: {:.2}",
        pool_id,
        estimator.estimate(&args.symbol_b, &args.symbol_a)
    );

    if args.keep_alive {
        println!("\n⏳ Running until Ctrl+C...");
        signal::ctrl_c().await?;
        println!("🛑 Shutting down");
    }

    Ok(())
}
