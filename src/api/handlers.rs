use crate::error::{ReconError, Result};
use crate::models::{
    Partner, PartnerType, Reconciliation, ReconciliationDetail, ReconciliationStatus,
    ReconciliationUpload, UploadDetail,
};
use crate::service::{CreateReconciliation, SubmitUpload, UploadService, WorkflowService};
use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

/// 共享状态: 上传控制器 + 审批工作流
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub workflow: Arc<WorkflowService>,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

fn parse_upload_type(raw: &str) -> Result<PartnerType> {
    match raw.trim() {
        "carrier" => Ok(PartnerType::Carrier),
        "platform" => Ok(PartnerType::Platform),
        other => Err(ReconError::Validation(format!(
            "upload_type must be carrier or platform, got {other:?}"
        ))),
    }
}

fn parse_id(field: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| ReconError::Validation(format!("{field} must be an integer, got {raw:?}")))
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ReconError::Validation(format!("{field} must be YYYY-MM-DD, got {raw:?}")))
}

/// 提交结算文件 (multipart: file + upload_type [+ partner_id, reconciliation_id, 账期])
///
/// 格式/大小问题同步拒绝; 受理成功即返回, 结果轮询 GET /api/uploads/{id}
pub async fn submit_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ReconciliationUpload>> {
    let mut file_name: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut upload_type: Option<PartnerType> = None;
    let mut partner_id: Option<i64> = None;
    let mut reconciliation_id: Option<i64> = None;
    let mut period_start: Option<NaiveDate> = None;
    let mut period_end: Option<NaiveDate> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ReconError::Validation(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ReconError::Validation(format!("failed to read file: {e}")))?;
                bytes = Some(data.to_vec());
            }
            Some(other) => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ReconError::Validation(format!("failed to read {other}: {e}")))?;
                match other {
                    "upload_type" => upload_type = Some(parse_upload_type(&text)?),
                    "partner_id" => partner_id = Some(parse_id("partner_id", &text)?),
                    "reconciliation_id" => {
                        reconciliation_id = Some(parse_id("reconciliation_id", &text)?)
                    }
                    "period_start" => period_start = Some(parse_date("period_start", &text)?),
                    "period_end" => period_end = Some(parse_date("period_end", &text)?),
                    _ => {}
                }
            }
            None => {}
        }
    }

    let req = SubmitUpload {
        file_name: file_name
            .ok_or_else(|| ReconError::Validation("file part is required".to_string()))?,
        bytes: bytes
            .ok_or_else(|| ReconError::Validation("file part is required".to_string()))?,
        upload_type: upload_type
            .ok_or_else(|| ReconError::Validation("upload_type is required".to_string()))?,
        partner_id,
        reconciliation_id,
        period_start,
        period_end,
    };

    let upload = state.uploads.submit(req).await?;
    Ok(Json(upload))
}

/// 查询上传, completed 后携带嵌套明细
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UploadDetail>> {
    Ok(Json(state.uploads.get(id).await?))
}

/// 创建对账单
pub async fn create_reconciliation(
    State(state): State<AppState>,
    Json(req): Json<CreateReconciliation>,
) -> Result<Json<Reconciliation>> {
    Ok(Json(state.workflow.create(req).await?))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target_status: ReconciliationStatus,
}

/// 审批状态跳转
pub async fn transition_reconciliation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<Reconciliation>> {
    Ok(Json(state.workflow.transition(id, req.target_status).await?))
}

/// 查询对账单 (含嵌套明细)
pub async fn get_reconciliation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ReconciliationDetail>> {
    Ok(Json(state.workflow.get(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PartnerQuery {
    pub partner_type: PartnerType,
}

/// 按类型列出可选合作方
pub async fn list_partners(
    State(state): State<AppState>,
    Query(query): Query<PartnerQuery>,
) -> Result<Json<Vec<Partner>>> {
    Ok(Json(state.workflow.list_partners(query.partner_type).await?))
}
