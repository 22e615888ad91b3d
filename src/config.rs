use serde::Deserialize;

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// 上传大小上限 (字节), 超出同步拒绝
    pub max_file_size: usize,
    /// 后台处理超时 (秒), 超时判 failed
    pub processing_timeout_secs: u64,
    /// 看门狗巡检间隔 (秒)
    pub watchdog_interval_secs: u64,
}

impl AppConfig {
    /// 默认值 + RECON__ 前缀环境变量 (如 RECON__SERVER__PORT=8080)
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default(
                "database.url",
                std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/settlement_recon".to_string()),
            )?
            .set_default("upload.max_file_size", 10 * 1024 * 1024)?
            .set_default("upload.processing_timeout_secs", 300)?
            .set_default("upload.watchdog_interval_secs", 60)?
            .add_source(config::Environment::with_prefix("RECON").separator("__"))
            .build()?
            .try_deserialize()
    }
}
