use crate::models::ReconciliationStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// 对账引擎统一错误类型
///
/// 同步错误直接返回给调用方; 后台处理阶段的错误被捕获后
/// 写入上传记录的 `error_message`, `failed` 状态即错误通道。
#[derive(Debug, Error)]
pub enum ReconError {
    /// 文件扩展名不在支持范围内 (同步拒绝)
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// 文件超过配置的大小上限 (同步拒绝)
    #[error("file too large: {size} bytes, limit is {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },

    /// 必填字段缺失或取值非法 (同步拒绝)
    #[error("validation failed: {0}")]
    Validation(String),

    /// 工作流状态机不允许的跳转
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ReconciliationStatus,
        to: ReconciliationStatus,
    },

    /// 对账单已离开 pending, 拒绝迟到的明细写入
    #[error("reconciliation {0} is no longer pending")]
    ReconciliationFrozen(i64),

    #[error("{0} not found")]
    NotFound(String),

    /// 后台匹配阶段的不可恢复错误
    #[error("processing fault: {0}")]
    Processing(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ReconError>;

impl From<csv::Error> for ReconError {
    fn from(e: csv::Error) -> Self {
        ReconError::Processing(format!("csv parse error: {e}"))
    }
}

impl From<calamine::Error> for ReconError {
    fn from(e: calamine::Error) -> Self {
        ReconError::Processing(format!("workbook parse error: {e}"))
    }
}

/// 错误响应体 (与正常响应共用 success/message 外壳)
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for ReconError {
    fn into_response(self) -> Response {
        let status = match &self {
            ReconError::UnsupportedFormat(_)
            | ReconError::Validation(_)
            | ReconError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            ReconError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ReconError::ReconciliationFrozen(_) => StatusCode::CONFLICT,
            ReconError::NotFound(_) => StatusCode::NOT_FOUND,
            ReconError::Processing(_) | ReconError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            success: false,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
