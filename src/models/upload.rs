use super::PartnerType;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// 上传文件处理状态机
///
/// ```text
/// pending --> processing --(success)--> completed
///                        \--(fault)---> failed
/// ```
///
/// completed / failed 为终态, 不重试; 重新处理需提交新的上传。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单行比对结论
///
/// matched 仅指金额完全一致; 任何非零差额记 mismatched;
/// 运单号在台账中不存在记 not_found。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "row_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Matched,
    Mismatched,
    NotFound,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Matched => "matched",
            RowStatus::Mismatched => "mismatched",
            RowStatus::NotFound => "not_found",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次文件处理尝试
///
/// 计数与金额汇总在处理完成时一次性落库, 读者只会看到
/// 处理前的零值或终态的完整汇总, 不存在中间部分和。
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReconciliationUpload {
    pub id: i64,
    pub file_name: String,
    pub upload_type: PartnerType,
    pub partner_id: Option<i64>,
    pub reconciliation_id: Option<i64>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub status: UploadStatus,
    pub total_records: i32,
    /// 金额完全一致的行数
    pub matched_records: i32,
    /// 金额不一致 (mismatched) 的行数; not_found 与无法解析的行不入桶
    pub unmatched_records: i32,
    pub total_amount_file: BigDecimal,
    pub total_amount_system: BigDecimal,
    pub difference_amount: BigDecimal,
    /// 仅 failed 状态携带
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 一条解析行的比对结果, 写入后不可变
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UploadItem {
    pub id: i64,
    pub upload_id: i64,
    pub tracking_number: Option<String>,
    pub reconciliation_status: RowStatus,
    pub cod_amount_file: BigDecimal,
    pub cod_amount_system: BigDecimal,
    pub shipping_fee_file: BigDecimal,
    pub shipping_fee_system: BigDecimal,
    pub difference_amount: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file_name: String,
    pub upload_type: PartnerType,
    pub partner_id: Option<i64>,
    pub reconciliation_id: Option<i64>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct NewUploadItem {
    pub tracking_number: Option<String>,
    pub reconciliation_status: RowStatus,
    pub cod_amount_file: BigDecimal,
    pub cod_amount_system: BigDecimal,
    pub shipping_fee_file: BigDecimal,
    pub shipping_fee_system: BigDecimal,
    pub difference_amount: BigDecimal,
}

/// 全量行集在内存中折叠出的上传级汇总
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSummary {
    pub total_records: i32,
    pub matched_records: i32,
    pub unmatched_records: i32,
    pub total_amount_file: BigDecimal,
    pub total_amount_system: BigDecimal,
    pub difference_amount: BigDecimal,
}

/// 上传 + 嵌套明细 (查询接口返回体)
#[derive(Debug, Clone, Serialize)]
pub struct UploadDetail {
    #[serde(flatten)]
    pub upload: ReconciliationUpload,
    pub items: Vec<UploadItem>,
}

/// 规范化后的结算行: 列语义已按上传类型解析
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRow {
    pub tracking_number: Option<String>,
    pub cod_amount: BigDecimal,
    pub shipping_fee: BigDecimal,
    /// 平台佣金, 承运商文件恒为零
    pub commission: BigDecimal,
}
