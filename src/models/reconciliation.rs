use super::PartnerType;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// 对账单审批状态机
///
/// ```text
/// pending --(confirm)--> confirmed --(approve)--> approved --(mark paid)--> paid
///    \--(reject)--> rejected
/// ```
///
/// confirmed 不可退回 pending: 已确认但有争议的对账单通过新建一张处理,
/// 保留审计轨迹。rejected / paid 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reconciliation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Pending,
    Confirmed,
    Approved,
    Paid,
    Rejected,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::Confirmed => "confirmed",
            ReconciliationStatus::Approved => "approved",
            ReconciliationStatus::Paid => "paid",
            ReconciliationStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationStatus::Paid | ReconciliationStatus::Rejected
        )
    }

    /// 状态机允许的跳转边, 其余一律拒绝
    pub fn can_transition_to(&self, target: ReconciliationStatus) -> bool {
        use ReconciliationStatus::*;
        matches!(
            (self, target),
            (Pending, Confirmed) | (Pending, Rejected) | (Confirmed, Approved) | (Approved, Paid)
        )
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对账单: 一个 (合作方, 账期) 的结算周期
///
/// 汇总字段仅在 pending 期间可重算, 离开 pending 后冻结。
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Reconciliation {
    pub id: i64,
    /// 唯一编号, 由分配的 id 生成 (CR-%06d / PT-%06d)
    pub code: String,
    pub recon_type: PartnerType,
    pub partner_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: ReconciliationStatus,
    pub total_orders: i32,
    pub total_amount: BigDecimal,
    pub total_shipping_fee: BigDecimal,
    /// 净额 = 订单总额 - 运费 (平台单再扣佣金), 即明细净额之和
    pub net_amount: BigDecimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 对账单明细: 一个订单对这张对账单的贡献 (按订单去重)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub id: i64,
    pub reconciliation_id: i64,
    pub order_id: i64,
    pub order_no: String,
    pub tracking_number: String,
    pub customer_name: String,
    pub order_amount: BigDecimal,
    pub shipping_fee: BigDecimal,
    pub cod_amount: BigDecimal,
    pub net_amount: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct NewReconciliation {
    pub recon_type: PartnerType,
    pub partner_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReconciliationItem {
    pub order_id: i64,
    pub order_no: String,
    pub tracking_number: String,
    pub customer_name: String,
    pub order_amount: BigDecimal,
    pub shipping_fee: BigDecimal,
    pub cod_amount: BigDecimal,
    pub net_amount: BigDecimal,
}

/// pending 期间重算出的汇总字段
#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationTotals {
    pub total_orders: i32,
    pub total_amount: BigDecimal,
    pub total_shipping_fee: BigDecimal,
    pub net_amount: BigDecimal,
}

/// 对账单 + 嵌套明细 (查询接口返回体)
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationDetail {
    #[serde(flatten)]
    pub reconciliation: Reconciliation,
    pub items: Vec<ReconciliationItem>,
}
