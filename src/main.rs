use anyhow::Context;
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use seckill_backend::{
    config::{CacheBackend, Config},
    database::{create_pool, run_migrations},
    events::EventPublisher,
    external::{Cache, LogNotifier, MemoryCache, MemoryCatalog, RedisCache},
    repositories::{MemoryPromotionRepository, PgPromotionRepository, PromotionRepository},
    services::*,
    tasks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Failed to load configuration")?;

    // 数据库为空时使用进程内存储
    let repo: Arc<dyn PromotionRepository> = if config.database.url.is_empty() {
        log::warn!("No database url configured, using in-memory store");
        Arc::new(MemoryPromotionRepository::new())
    } else {
        let pool = create_pool(&config.database)
            .await
            .context("Failed to create database connection pool")?;
        run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        Arc::new(
            PgPromotionRepository::new(pool).with_lock_timeout(config.admission.lock_timeout()),
        )
    };

    let cache: Arc<dyn Cache> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Redis => Arc::new(
            RedisCache::new(&config.cache.redis_url)
                .await
                .context("Failed to connect to Redis")?,
        ),
    };

    let notifier = Arc::new(LogNotifier);
    let (events, rx) = EventPublisher::channel();
    // 商品目录变更经同一通道驱动缓存同步
    let catalog = Arc::new(MemoryCatalog::with_events(events.clone()));

    // 缓存同步消费者
    let cache_sync = CacheSyncService::new(
        cache,
        repo.clone(),
        notifier.clone(),
        config.cache.key_prefix.clone(),
        config.stock_warning.threshold,
    );
    tokio::spawn(cache_sync.run(rx));

    let retry = config.admission.retry_policy();
    let campaign_service = CampaignService::new(repo.clone(), catalog, events.clone());
    let admission_service = AdmissionService::new(
        repo.clone(),
        events.clone(),
        retry.clone(),
        config.admission.timeout(),
    );
    let group_buy_service = GroupBuyService::new(repo, notifier, events, retry);

    tasks::spawn_all(
        campaign_service,
        admission_service,
        group_buy_service,
        config.sweep.clone(),
    );

    log::info!("Promotion engine started, waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    log::info!("Shutting down");
    Ok(())
}
