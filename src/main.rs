use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Context;
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use giveaway_engine::{
    config::Config,
    database::{JsonFileStorage, MemoryStorage, SnapshotStorage},
    external::{
        AllowAllGate, EligibilityGate, HttpEligibilityGate, LogNotifier, ResultNotifier,
        WebhookNotifier,
    },
    handlers,
    middlewares::create_cors,
    services::*,
    swagger::swagger_config,
    tasks,
    utils::{Clock, SystemClock},
};

#[actix_web::main]
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
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    // 快照存储
    let storage: Arc<dyn SnapshotStorage> = match &config.storage.snapshot_path {
        Some(path) => Arc::new(
            JsonFileStorage::open(path)
                .await
                .context("Failed to open giveaway snapshot")?,
        ),
        None => {
            log::warn!("No snapshot path configured, giveaways will not survive restarts");
            Arc::new(MemoryStorage::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(GiveawayStore::new(
        storage,
        clock.clone(),
        Duration::from_millis(config.storage.write_timeout_ms),
    ));
    store
        .load_all()
        .await
        .context("Failed to load giveaway snapshot")?;

    // 外部协作方
    let gate: Arc<dyn EligibilityGate> = match &config.eligibility.endpoint {
        Some(endpoint) => Arc::new(HttpEligibilityGate::new(endpoint, &config.eligibility)?),
        None => Arc::new(AllowAllGate),
    };
    let notifier: Arc<dyn ResultNotifier> = match &config.notifier.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url, &config.notifier)?),
        None => Arc::new(LogNotifier),
    };

    // 创建服务
    let tracker = EntryTracker::new(store.clone(), gate);
    let coordinator = GiveawayCoordinator::new(
        store.clone(),
        Arc::new(WinnerSelector::new()),
        notifier,
        clock.clone(),
        config.scheduler.closing_timeout(),
    );
    let scheduler = Arc::new(GiveawayScheduler::new(
        store.clone(),
        coordinator.clone(),
        clock.clone(),
        SchedulerSettings {
            tick_interval: Duration::from_secs(config.scheduler.tick_interval_secs),
            ended_retention: config.scheduler.ended_retention(),
            close_concurrency: config.scheduler.close_concurrency,
        },
    ));

    let (entry_tx, entry_rx) = mpsc::channel(config.giveaway.entry_queue_capacity);
    let giveaway_service = GiveawayService::new(
        store.clone(),
        tracker.clone(),
        coordinator,
        clock,
        entry_tx,
        &config.giveaway,
    );

    // 启动后台任务（首个 tick 立即执行，补关离线期间到期的抽奖）
    let background = tasks::spawn_all(scheduler, tracker, entry_rx);

    // 启动HTTP服务器
    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    let allowed_origins = config.server.allowed_origins.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors(&allowed_origins))
            .app_data(web::Data::new(giveaway_service.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(web::scope("/api/v1").configure(handlers::giveaway_config))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run();

    let result = server.await;

    background.abort();
    if let Err(e) = store.persist_all().await {
        log::error!("Final snapshot write failed: {e}");
    }
    log::info!("Giveaway engine stopped");
    result.map_err(Into::into)
}
