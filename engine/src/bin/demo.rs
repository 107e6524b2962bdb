//! Flash sale demo: many buyers race for a handful of units.
//!
//! ```bash
//! DEMO_BUYERS=500 DEMO_STOCK=20 cargo run -p flash-sale-engine --bin flash-sale-demo
//! FLASH_SALE_REDIS_URL=redis://127.0.0.1:6379 cargo run -p flash-sale-engine --bin flash-sale-demo
//! ```

use chrono::{Duration, Utc};
use flash_sale_core::FlashSaleError;
use flash_sale_core::environment::SystemClock;
use flash_sale_core::types::{Identity, NewItem, SaleWindow};
use flash_sale_engine::mocks::{InMemoryFastStore, InMemoryRecordStore};
use flash_sale_engine::providers::{FastStore, RecordStore};
use flash_sale_engine::stores::RedisFastStore;
use flash_sale_engine::{AppConfig, FlashSaleService};
use flash_sale_runtime::metrics::MetricsServer;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    out_of_stock: usize,
    rate_limited: usize,
    other: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flash_sale_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let metrics_addr: SocketAddr = env::var("METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
        .parse()?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;

    let config = AppConfig::from_env()?;
    let buyers = env_or("DEMO_BUYERS", 200);
    let stock = env_or("DEMO_STOCK", 10);

    #[cfg(feature = "postgres")]
    if let Some(url) = config.database_url.clone() {
        let pool = sqlx::PgPool::connect(&url).await?;
        let records = flash_sale_engine::stores::PostgresRecordStore::new(pool);
        records.migrate().await?;
        info!("Using PostgreSQL record store");
        return match config.redis_url.clone() {
            Some(redis) => run(RedisFastStore::new(&redis).await?, records, config, buyers, stock, &metrics).await,
            None => run(InMemoryFastStore::new(), records, config, buyers, stock, &metrics).await,
        };
    }

    match config.redis_url.clone() {
        Some(url) => {
            info!("Using Redis fast store");
            let fast = RedisFastStore::new(&url).await?;
            run(fast, InMemoryRecordStore::new(), config, buyers, stock, &metrics).await
        }
        None => {
            info!("Using in-memory stores");
            run(InMemoryFastStore::new(), InMemoryRecordStore::new(), config, buyers, stock, &metrics).await
        }
    }
}

async fn run<F, R>(
    fast: F,
    records: R,
    config: AppConfig,
    buyers: usize,
    stock: i64,
    metrics: &MetricsServer,
) -> anyhow::Result<()>
where
    F: FastStore + 'static,
    R: RecordStore + 'static,
{
    // Every buyer gets its own identity, so only the global bucket can bite.
    let service = Arc::new(FlashSaleService::new(fast, records, config.sale, Arc::new(SystemClock))?);

    let now = Utc::now();
    let item = service
        .create_item(&NewItem {
            name: "Limited Edition Phone".to_string(),
            price_cents: 99_900,
            stock,
            sale_stock: stock,
            window: SaleWindow::new(now - Duration::seconds(1), now + Duration::hours(1))?,
        })
        .await?;

    info!(buyers, stock, item_id = %item.id, "Sale open");
    let started = Instant::now();

    let mut handles = Vec::with_capacity(buyers);
    for n in 0..buyers {
        let service = Arc::clone(&service);
        let item_id = item.id;
        handles.push(tokio::spawn(async move {
            let identity = Identity::new(format!("buyer-{n:04}"));
            let token = service.issue_token(&identity, item_id).await?;
            service.purchase(&identity, item_id, &token).await
        }));
    }

    let mut tally = Tally::default();
    let mut orders = Vec::new();
    for handle in handles {
        match handle.await? {
            Ok(order) => {
                tally.succeeded += 1;
                orders.push(order.order_no);
            }
            Err(FlashSaleError::OutOfStock) => tally.out_of_stock += 1,
            Err(FlashSaleError::RateLimited { .. }) => tally.rate_limited += 1,
            Err(err) => {
                tracing::warn!(error = %err, code = err.code(), "Purchase failed");
                tally.other += 1;
            }
        }
    }

    let elapsed = started.elapsed();
    let remaining = service.stock(item.id).await?;
    let mut stored = 0usize;
    for order_no in &orders {
        if service.get_order(order_no).await.is_ok() {
            stored += 1;
        }
    }

    println!("Flash sale finished in {elapsed:?}");
    println!("  buyers:        {buyers}");
    println!("  succeeded:     {}", tally.succeeded);
    println!("  out of stock:  {}", tally.out_of_stock);
    println!("  rate limited:  {}", tally.rate_limited);
    println!("  other errors:  {}", tally.other);
    println!("  stock left:    {remaining}");
    println!("  orders stored: {stored}");

    if env::var("DEMO_PRINT_METRICS").is_ok() {
        if let Some(text) = metrics.render() {
            println!("\n{text}");
        }
    }

    Ok(())
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
