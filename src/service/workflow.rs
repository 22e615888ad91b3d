use super::aggregator::ReconLocks;
use crate::error::{ReconError, Result};
use crate::models::{
    NewReconciliation, Partner, PartnerType, Reconciliation, ReconciliationDetail,
    ReconciliationStatus,
};
use crate::store::ReconStore;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

/// 建单请求; 必填字段缺失在这里报具体字段名
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReconciliation {
    pub recon_type: PartnerType,
    pub partner_id: Option<i64>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// 对账单审批工作流
///
/// 用户决策驱动; 汇总字段对它只读 (证据), 重算由聚合服务负责。
pub struct WorkflowService {
    store: Arc<dyn ReconStore>,
    locks: ReconLocks,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn ReconStore>, locks: ReconLocks) -> Self {
        Self { store, locks }
    }

    pub async fn create(&self, req: CreateReconciliation) -> Result<Reconciliation> {
        let partner_id = req
            .partner_id
            .ok_or_else(|| ReconError::Validation("partner_id is required".to_string()))?;
        let period_start = req
            .period_start
            .ok_or_else(|| ReconError::Validation("period_start is required".to_string()))?;
        let period_end = req
            .period_end
            .ok_or_else(|| ReconError::Validation("period_end is required".to_string()))?;
        if period_start > period_end {
            return Err(ReconError::Validation(
                "period_start must be on or before period_end".to_string(),
            ));
        }

        let partner = self
            .store
            .get_partner(partner_id)
            .await?
            .ok_or_else(|| ReconError::Validation(format!("partner {partner_id} does not exist")))?;
        if partner.partner_type != req.recon_type {
            return Err(ReconError::Validation(format!(
                "partner {} is a {} partner, reconciliation type is {}",
                partner_id, partner.partner_type, req.recon_type
            )));
        }

        let recon = self
            .store
            .insert_reconciliation(NewReconciliation {
                recon_type: req.recon_type,
                partner_id,
                period_start,
                period_end,
                notes: req.notes,
            })
            .await?;
        tracing::info!(
            "对账单 {} ({}) 创建: 合作方 {}, 账期 {} ~ {}",
            recon.id,
            recon.code,
            partner.name,
            recon.period_start,
            recon.period_end
        );
        Ok(recon)
    }

    /// 审批状态跳转
    ///
    /// 与聚合回写共用对账单级锁, 跳转不会与进行中的明细回写交错;
    /// 未列出的边与终态出边一律 InvalidTransition, 状态与汇总不变。
    pub async fn transition(
        &self,
        id: i64,
        target: ReconciliationStatus,
    ) -> Result<Reconciliation> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let recon = self
            .store
            .get_reconciliation(id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("reconciliation {id}")))?;
        if !recon.status.can_transition_to(target) {
            return Err(ReconError::InvalidTransition {
                from: recon.status,
                to: target,
            });
        }

        let updated = self
            .store
            .update_reconciliation_status(id, recon.status, target)
            .await?;
        tracing::info!(
            "对账单 {} ({}): {} -> {}",
            id,
            updated.code,
            recon.status,
            target
        );
        Ok(updated)
    }

    /// 对账单 + 嵌套明细
    pub async fn get(&self, id: i64) -> Result<ReconciliationDetail> {
        let reconciliation = self
            .store
            .get_reconciliation(id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("reconciliation {id}")))?;
        let items = self.store.list_reconciliation_items(id).await?;
        Ok(ReconciliationDetail {
            reconciliation,
            items,
        })
    }

    /// 可选合作方列表 (合作方管理属外部模块, 这里只读)
    pub async fn list_partners(&self, partner_type: PartnerType) -> Result<Vec<Partner>> {
        self.store.list_partners(partner_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use bigdecimal::{BigDecimal, Zero};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup() -> (Arc<MemStore>, WorkflowService, i64) {
        let store = Arc::new(MemStore::new());
        let partner = store.seed_partner("顺丰", PartnerType::Carrier);
        let workflow = WorkflowService::new(store.clone(), ReconLocks::new());
        (store, workflow, partner.id)
    }

    fn create_req(partner_id: i64, start: NaiveDate, end: NaiveDate) -> CreateReconciliation {
        CreateReconciliation {
            recon_type: PartnerType::Carrier,
            partner_id: Some(partner_id),
            period_start: Some(start),
            period_end: Some(end),
            notes: None,
        }
    }

    #[tokio::test]
    async fn create_generates_code_and_starts_pending() {
        let (_, workflow, partner_id) = setup().await;
        let recon = workflow
            .create(create_req(partner_id, ymd(2024, 1, 1), ymd(2024, 1, 31)))
            .await
            .unwrap();
        assert_eq!(recon.status, ReconciliationStatus::Pending);
        assert!(recon.code.starts_with("CR-"));
        assert_eq!(recon.total_orders, 0);
        assert_eq!(recon.net_amount, BigDecimal::zero());
    }

    #[tokio::test]
    async fn create_rejects_inverted_period() {
        let (_, workflow, partner_id) = setup().await;
        let err = workflow
            .create(create_req(partner_id, ymd(2024, 2, 1), ymd(2024, 1, 15)))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Validation(_)));
    }

    #[tokio::test]
    async fn create_names_missing_field() {
        let (_, workflow, _) = setup().await;
        let err = workflow
            .create(CreateReconciliation {
                recon_type: PartnerType::Carrier,
                partner_id: None,
                period_start: Some(ymd(2024, 1, 1)),
                period_end: Some(ymd(2024, 1, 31)),
                notes: None,
            })
            .await
            .unwrap_err();
        match err {
            ReconError::Validation(msg) => assert!(msg.contains("partner_id")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn create_rejects_partner_type_mismatch() {
        let (store, workflow, _) = setup().await;
        let platform = store.seed_partner("淘宝", PartnerType::Platform);
        let err = workflow
            .create(create_req(platform.id, ymd(2024, 1, 1), ymd(2024, 1, 31)))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Validation(_)));
    }

    #[tokio::test]
    async fn happy_path_walks_to_paid() {
        let (_, workflow, partner_id) = setup().await;
        let recon = workflow
            .create(create_req(partner_id, ymd(2024, 1, 1), ymd(2024, 1, 31)))
            .await
            .unwrap();

        let recon = workflow
            .transition(recon.id, ReconciliationStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(recon.status, ReconciliationStatus::Confirmed);
        let recon = workflow
            .transition(recon.id, ReconciliationStatus::Approved)
            .await
            .unwrap();
        let recon = workflow
            .transition(recon.id, ReconciliationStatus::Paid)
            .await
            .unwrap();
        assert_eq!(recon.status, ReconciliationStatus::Paid);
    }

    #[tokio::test]
    async fn illegal_edges_fail_and_leave_state_unchanged() {
        let (store, workflow, partner_id) = setup().await;
        let recon = workflow
            .create(create_req(partner_id, ymd(2024, 1, 1), ymd(2024, 1, 31)))
            .await
            .unwrap();

        // pending 不能直接 paid
        let err = workflow
            .transition(recon.id, ReconciliationStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidTransition { .. }));
        let current = store.get_reconciliation(recon.id).await.unwrap().unwrap();
        assert_eq!(current.status, ReconciliationStatus::Pending);

        // rejected 是终态
        workflow
            .transition(recon.id, ReconciliationStatus::Rejected)
            .await
            .unwrap();
        for target in [
            ReconciliationStatus::Pending,
            ReconciliationStatus::Confirmed,
            ReconciliationStatus::Approved,
            ReconciliationStatus::Paid,
        ] {
            let err = workflow.transition(recon.id, target).await.unwrap_err();
            assert!(matches!(err, ReconError::InvalidTransition { .. }));
        }
        let current = store.get_reconciliation(recon.id).await.unwrap().unwrap();
        assert_eq!(current.status, ReconciliationStatus::Rejected);
    }

    #[tokio::test]
    async fn confirmed_cannot_return_to_pending() {
        let (_, workflow, partner_id) = setup().await;
        let recon = workflow
            .create(create_req(partner_id, ymd(2024, 1, 1), ymd(2024, 1, 31)))
            .await
            .unwrap();
        workflow
            .transition(recon.id, ReconciliationStatus::Confirmed)
            .await
            .unwrap();
        let err = workflow
            .transition(recon.id, ReconciliationStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidTransition { .. }));
    }
}
