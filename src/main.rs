use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use settlement_recon::api::{self, AppState};
use settlement_recon::service::{ReconLocks, UploadService, WorkflowService};
use settlement_recon::store::PgStore;
use settlement_recon::{create_pool, AppConfig, ReconStore};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database.url).await?;
    info!("Database pool created");

    let store: Arc<dyn ReconStore> = Arc::new(PgStore::new(pool));
    let locks = ReconLocks::new();
    let processing_timeout = Duration::from_secs(config.upload.processing_timeout_secs);

    let uploads = Arc::new(UploadService::new(
        store.clone(),
        locks.clone(),
        config.upload.max_file_size,
        processing_timeout,
    ));
    let workflow = Arc::new(WorkflowService::new(store, locks));

    // 看门狗: 卡死的 processing 上传定期判失败
    {
        let uploads = uploads.clone();
        let interval = Duration::from_secs(config.upload.watchdog_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match uploads.expire_stale(processing_timeout).await {
                    Ok(0) => {}
                    Ok(n) => tracing::warn!("看门狗: {} 个上传处理超时判失败", n),
                    Err(e) => tracing::error!("看门狗巡检失败: {}", e),
                }
            }
        });
    }

    let state = AppState { uploads, workflow };

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/uploads", post(api::submit_upload))
        .route("/api/uploads/:id", get(api::get_upload))
        .route("/api/reconciliations", post(api::create_reconciliation))
        .route("/api/reconciliations/:id", get(api::get_reconciliation))
        .route(
            "/api/reconciliations/:id/transition",
            post(api::transition_reconciliation),
        )
        .route("/api/partners", get(api::list_partners))
        .layer(DefaultBodyLimit::max(config.upload.max_file_size * 2))
        .layer(ServiceBuilder::new())
        .with_state(state);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/uploads                        - 提交结算文件");
    info!("  GET  /api/uploads/:id                    - 查询上传结果");
    info!("  POST /api/reconciliations                - 创建对账单");
    info!("  POST /api/reconciliations/:id/transition - 审批状态跳转");
    info!("  GET  /api/reconciliations/:id            - 查询对账单");
    info!("  GET  /api/partners                       - 可选合作方列表");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
