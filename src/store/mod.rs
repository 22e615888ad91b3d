pub mod memory;
pub mod pg;

pub use memory::MemStore;
pub use pg::{create_pool, PgStore};

use crate::error::Result;
use crate::models::{
    NewReconciliation, NewReconciliationItem, NewShipment, NewUpload, NewUploadItem, Partner,
    PartnerType, Reconciliation, ReconciliationItem, ReconciliationStatus, ReconciliationTotals,
    ReconciliationUpload, Shipment, UploadItem, UploadSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 对账引擎持久化接口
///
/// 生产环境为 PgStore (Postgres/sqlx); 测试与内嵌场景为 MemStore。
/// 冻结判定与汇总重算的互斥由服务层的对账单级锁保证,
/// 这里只负责单次读写本身的原子性。
#[async_trait]
pub trait ReconStore: Send + Sync {
    // ---------- 合作方 (只读查表) ----------
    async fn list_partners(&self, partner_type: PartnerType) -> Result<Vec<Partner>>;
    async fn get_partner(&self, id: i64) -> Result<Option<Partner>>;

    // ---------- 运单台账 ----------
    async fn insert_shipment(&self, shipment: NewShipment) -> Result<Shipment>;

    /// 按运单号查找, 限定合作方范围 (给定时)。
    /// 运单号重复时取创建最晚的一条 (created_at DESC, id DESC)。
    async fn find_shipment_by_tracking(
        &self,
        partner_id: Option<i64>,
        tracking_number: &str,
    ) -> Result<Option<Shipment>>;

    // ---------- 对账单 ----------
    async fn insert_reconciliation(&self, new: NewReconciliation) -> Result<Reconciliation>;
    async fn get_reconciliation(&self, id: i64) -> Result<Option<Reconciliation>>;
    async fn list_reconciliation_items(&self, reconciliation_id: i64)
        -> Result<Vec<ReconciliationItem>>;

    /// 比较并交换式状态更新; 当前状态不等于 expected 时不落盘
    async fn update_reconciliation_status(
        &self,
        id: i64,
        expected: ReconciliationStatus,
        target: ReconciliationStatus,
    ) -> Result<Reconciliation>;

    /// 明细写入 + 汇总重算, 单次原子操作。
    /// 按 order_id 新增或覆盖明细 (覆盖即 last-write-wins), 随后从
    /// 存量全集重算汇总字段并落库; 两者要么同时生效要么都不生效,
    /// 任何时刻明细与汇总互相一致。返回重算后的汇总。
    async fn apply_reconciliation_items(
        &self,
        reconciliation_id: i64,
        items: Vec<NewReconciliationItem>,
    ) -> Result<ReconciliationTotals>;

    // ---------- 上传 ----------
    async fn insert_upload(&self, new: NewUpload) -> Result<ReconciliationUpload>;
    async fn get_upload(&self, id: i64) -> Result<Option<ReconciliationUpload>>;
    async fn list_upload_items(&self, upload_id: i64) -> Result<Vec<UploadItem>>;

    /// pending -> processing, 文件受理后立即调用
    async fn mark_upload_processing(&self, id: i64) -> Result<()>;

    /// 唯一的终态成功写入: 明细 + 汇总 + completed 一次提交。
    /// 仅对 processing 状态生效, 终态不可覆盖。
    async fn complete_upload(
        &self,
        id: i64,
        summary: UploadSummary,
        items: Vec<NewUploadItem>,
    ) -> Result<()>;

    /// 终态失败写入, error_message 即后台错误通道。
    /// 仅对 processing 状态生效。
    async fn fail_upload(&self, id: i64, message: &str) -> Result<()>;

    /// 超时看门狗用: 卡在 processing 且早于 cutoff 的上传 id
    async fn list_stale_processing_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>>;
}
