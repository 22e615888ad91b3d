use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use settlement_recon::models::{
    NewReconciliation, NewReconciliationItem, NewShipment, NewUpload, NewUploadItem, Partner,
    PartnerType, Reconciliation, ReconciliationItem, ReconciliationStatus, ReconciliationTotals,
    ReconciliationUpload, RowStatus, Shipment, UploadItem, UploadStatus, UploadSummary,
};
use settlement_recon::service::{
    CreateReconciliation, ReconLocks, SubmitUpload, UploadService, WorkflowService,
};
use settlement_recon::store::{MemStore, ReconStore};
use settlement_recon::{ReconError, Result as ReconResult};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Harness {
    store: Arc<MemStore>,
    uploads: Arc<UploadService>,
    workflow: Arc<WorkflowService>,
}

fn harness() -> Harness {
    let store = Arc::new(MemStore::new());
    let dyn_store: Arc<dyn ReconStore> = store.clone();
    let locks = ReconLocks::new();
    let uploads = Arc::new(UploadService::new(
        dyn_store.clone(),
        locks.clone(),
        1024 * 1024,
        Duration::from_secs(10),
    ));
    let workflow = Arc::new(WorkflowService::new(dyn_store, locks));
    Harness {
        store,
        uploads,
        workflow,
    }
}

async fn seed_shipment(
    store: &MemStore,
    partner_id: i64,
    order_id: i64,
    tracking: &str,
    cod: &str,
    fee: &str,
) {
    store
        .insert_shipment(NewShipment {
            order_id,
            order_no: format!("SO{order_id}"),
            partner_id,
            tracking_number: tracking.to_string(),
            customer_name: format!("客户{order_id}"),
            order_amount: dec(cod),
            shipping_fee: dec(fee),
            cod_amount: dec(cod),
        })
        .await
        .unwrap();
}

fn carrier_submit(file_name: &str, csv: String, partner_id: i64, reconciliation_id: Option<i64>) -> SubmitUpload {
    SubmitUpload {
        file_name: file_name.to_string(),
        bytes: csv.into_bytes(),
        upload_type: PartnerType::Carrier,
        partner_id: Some(partner_id),
        reconciliation_id,
        period_start: None,
        period_end: None,
    }
}

async fn wait_terminal(store: &MemStore, upload_id: i64) -> ReconciliationUpload {
    for _ in 0..500 {
        let upload = store.get_upload(upload_id).await.unwrap().unwrap();
        if upload.status.is_terminal() {
            return upload;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upload {upload_id} never reached a terminal state");
}

#[tokio::test]
async fn rejects_bad_files_synchronously() {
    let h = harness();
    let partner = h.store.seed_partner("顺丰", PartnerType::Carrier);

    let err = h
        .uploads
        .submit(carrier_submit("statement.pdf", "x".to_string(), partner.id, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconError::UnsupportedFormat(_)));

    let big = "tracking_number,cod_amount\n".to_string() + &"SF1,1\n".repeat(500_000);
    let err = h
        .uploads
        .submit(carrier_submit("big.csv", big, partner.id, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconError::FileTooLarge { .. }));
}

/// 10 行文件: 7 行全等, 2 行运费差 5000, 1 行未知运单号
#[tokio::test]
async fn scenario_mixed_file_end_to_end() {
    let h = harness();
    let partner = h.store.seed_partner("顺丰", PartnerType::Carrier);

    let mut csv = String::from("tracking_number,cod_amount,shipping_fee\n");
    for i in 1..=7 {
        seed_shipment(&h.store, partner.id, i, &format!("SF{i:04}"), "100.00", "10.00").await;
        csv.push_str(&format!("SF{i:04},100.00,10.00\n"));
    }
    for i in 8..=9 {
        seed_shipment(&h.store, partner.id, i, &format!("SF{i:04}"), "100.00", "10.00").await;
        csv.push_str(&format!("SF{i:04},100.00,5010.00\n"));
    }
    csv.push_str("SF9999,300.00,20.00\n");

    let accepted = h
        .uploads
        .submit(carrier_submit("settle.csv", csv, partner.id, None))
        .await
        .unwrap();
    // 终态之前计数恒为零
    assert_eq!(accepted.total_records, 0);
    assert_eq!(accepted.matched_records, 0);

    let done = wait_terminal(&h.store, accepted.id).await;
    assert_eq!(done.status, UploadStatus::Completed);
    assert_eq!(done.total_records, 10);
    assert_eq!(done.matched_records, 7);
    assert_eq!(done.unmatched_records, 2);
    // 差额 = 两笔 5000 运费差 + 未知行文件侧全额 (300 + 20)
    assert_eq!(done.difference_amount, dec("10320.00"));
    assert_eq!(
        done.difference_amount,
        &done.total_amount_file - &done.total_amount_system
    );
    assert!(done.error_message.is_none());

    let items = h.store.list_upload_items(done.id).await.unwrap();
    assert_eq!(items.len(), 10);
    assert_eq!(
        items
            .iter()
            .filter(|i| i.reconciliation_status == RowStatus::NotFound)
            .count(),
        1
    );
}

/// 同一文件重跑: 汇总与对账单结论不变
#[tokio::test]
async fn reprocessing_same_rows_is_idempotent() {
    let h = harness();
    let partner = h.store.seed_partner("顺丰", PartnerType::Carrier);
    seed_shipment(&h.store, partner.id, 1, "SF0001", "80.00", "8.00").await;
    seed_shipment(&h.store, partner.id, 2, "SF0002", "90.00", "9.00").await;

    let recon = h
        .workflow
        .create(CreateReconciliation {
            recon_type: PartnerType::Carrier,
            partner_id: Some(partner.id),
            period_start: Some(ymd(2024, 1, 1)),
            period_end: Some(ymd(2024, 1, 31)),
            notes: None,
        })
        .await
        .unwrap();

    let csv = "tracking_number,cod_amount,shipping_fee\nSF0001,80.00,8.00\nSF0002,90.00,9.00\n";

    let first = h
        .uploads
        .submit(carrier_submit("a.csv", csv.to_string(), partner.id, Some(recon.id)))
        .await
        .unwrap();
    let first = wait_terminal(&h.store, first.id).await;
    assert_eq!(first.status, UploadStatus::Completed);
    let after_first = h.store.get_reconciliation(recon.id).await.unwrap().unwrap();

    let second = h
        .uploads
        .submit(carrier_submit("a-again.csv", csv.to_string(), partner.id, Some(recon.id)))
        .await
        .unwrap();
    let second = wait_terminal(&h.store, second.id).await;
    assert_eq!(second.status, UploadStatus::Completed);
    assert_eq!(second.total_amount_file, first.total_amount_file);
    assert_eq!(second.difference_amount, first.difference_amount);

    let after_second = h.store.get_reconciliation(recon.id).await.unwrap().unwrap();
    assert_eq!(after_second.total_orders, after_first.total_orders);
    assert_eq!(after_second.net_amount, after_first.net_amount);
    assert_eq!(after_second.total_orders, 2);
    // 净额 = (80 - 8) + (90 - 9)
    assert_eq!(after_second.net_amount, dec("153.00"));
}

/// 确认后迟到的上传: 冻结拒绝, 对账单分毫不动
#[tokio::test]
async fn late_upload_against_confirmed_reconciliation_is_frozen_out() {
    let h = harness();
    let partner = h.store.seed_partner("顺丰", PartnerType::Carrier);
    seed_shipment(&h.store, partner.id, 1, "SF0001", "80.00", "8.00").await;
    seed_shipment(&h.store, partner.id, 2, "SF0002", "90.00", "9.00").await;

    let recon = h
        .workflow
        .create(CreateReconciliation {
            recon_type: PartnerType::Carrier,
            partner_id: Some(partner.id),
            period_start: Some(ymd(2024, 1, 1)),
            period_end: Some(ymd(2024, 1, 31)),
            notes: None,
        })
        .await
        .unwrap();

    let first = h
        .uploads
        .submit(carrier_submit(
            "a.csv",
            "tracking_number,cod_amount,shipping_fee\nSF0001,80.00,8.00\n".to_string(),
            partner.id,
            Some(recon.id),
        ))
        .await
        .unwrap();
    wait_terminal(&h.store, first.id).await;

    h.workflow
        .transition(recon.id, ReconciliationStatus::Confirmed)
        .await
        .unwrap();
    let frozen = h.store.get_reconciliation(recon.id).await.unwrap().unwrap();

    let late = h
        .uploads
        .submit(carrier_submit(
            "b.csv",
            "tracking_number,cod_amount,shipping_fee\nSF0002,90.00,9.00\n".to_string(),
            partner.id,
            Some(recon.id),
        ))
        .await
        .unwrap();
    let late = wait_terminal(&h.store, late.id).await;

    // failed 即后台错误通道
    assert_eq!(late.status, UploadStatus::Failed);
    assert!(late
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("no longer pending"));

    let after = h.store.get_reconciliation(recon.id).await.unwrap().unwrap();
    assert_eq!(after.status, ReconciliationStatus::Confirmed);
    assert_eq!(after.total_orders, frozen.total_orders);
    assert_eq!(after.total_amount, frozen.total_amount);
    assert_eq!(after.net_amount, frozen.net_amount);
    let items = h.store.list_reconciliation_items(recon.id).await.unwrap();
    assert_eq!(items.len(), 1);
}

/// 两个上传并发回写同一对账单: 订单并集, 不丢更新不重复计数
#[tokio::test]
async fn concurrent_uploads_against_one_reconciliation() {
    let h = harness();
    let partner = h.store.seed_partner("顺丰", PartnerType::Carrier);
    for i in 1..=6 {
        seed_shipment(&h.store, partner.id, i, &format!("SF{i:04}"), "100.00", "10.00").await;
    }

    let recon = h
        .workflow
        .create(CreateReconciliation {
            recon_type: PartnerType::Carrier,
            partner_id: Some(partner.id),
            period_start: Some(ymd(2024, 1, 1)),
            period_end: Some(ymd(2024, 1, 31)),
            notes: None,
        })
        .await
        .unwrap();

    // 两个文件有重叠订单 (3, 4)
    let mut file_a = String::from("tracking_number,cod_amount,shipping_fee\n");
    for i in 1..=4 {
        file_a.push_str(&format!("SF{i:04},100.00,10.00\n"));
    }
    let mut file_b = String::from("tracking_number,cod_amount,shipping_fee\n");
    for i in 3..=6 {
        file_b.push_str(&format!("SF{i:04},100.00,10.00\n"));
    }

    let (a, b) = tokio::join!(
        h.uploads
            .submit(carrier_submit("a.csv", file_a, partner.id, Some(recon.id))),
        h.uploads
            .submit(carrier_submit("b.csv", file_b, partner.id, Some(recon.id))),
    );
    let a = wait_terminal(&h.store, a.unwrap().id).await;
    let b = wait_terminal(&h.store, b.unwrap().id).await;
    assert_eq!(a.status, UploadStatus::Completed);
    assert_eq!(b.status, UploadStatus::Completed);

    let after = h.store.get_reconciliation(recon.id).await.unwrap().unwrap();
    assert_eq!(after.total_orders, 6);
    assert_eq!(after.total_amount, dec("600.00"));
    assert_eq!(after.total_shipping_fee, dec("60.00"));
    assert_eq!(after.net_amount, dec("540.00"));
    let items = h.store.list_reconciliation_items(recon.id).await.unwrap();
    assert_eq!(items.len(), 6);
}

/// 平台上传: 佣金进入净额口径
#[tokio::test]
async fn platform_upload_net_amount_subtracts_commission() {
    let h = harness();
    let partner = h.store.seed_partner("淘宝", PartnerType::Platform);
    seed_shipment(&h.store, partner.id, 1, "TB0001", "200.00", "12.00").await;

    let recon = h
        .workflow
        .create(CreateReconciliation {
            recon_type: PartnerType::Platform,
            partner_id: Some(partner.id),
            period_start: Some(ymd(2024, 3, 1)),
            period_end: Some(ymd(2024, 3, 31)),
            notes: Some("3月平台账单".to_string()),
        })
        .await
        .unwrap();
    assert!(recon.code.starts_with("PT-"));

    let csv = "order_no,cod_amount,shipping_fee,commission\nTB0001,200.00,12.00,6.00\n";
    let upload = h
        .uploads
        .submit(SubmitUpload {
            file_name: "platform.csv".to_string(),
            bytes: csv.as_bytes().to_vec(),
            upload_type: PartnerType::Platform,
            partner_id: Some(partner.id),
            reconciliation_id: Some(recon.id),
            period_start: None,
            period_end: None,
        })
        .await
        .unwrap();
    let upload = wait_terminal(&h.store, upload.id).await;
    assert_eq!(upload.status, UploadStatus::Completed);

    let after = h.store.get_reconciliation(recon.id).await.unwrap().unwrap();
    // 净额 = 200 - 12 - 6
    assert_eq!(after.net_amount, dec("182.00"));
}

/// 回写被人为拖慢的存储, 用来制造流水线超时打断回写的时机
struct StallingStore {
    inner: Arc<MemStore>,
    delay_before_apply: Duration,
    delay_after_apply: Duration,
}

#[async_trait]
impl ReconStore for StallingStore {
    async fn list_partners(&self, partner_type: PartnerType) -> ReconResult<Vec<Partner>> {
        self.inner.list_partners(partner_type).await
    }

    async fn get_partner(&self, id: i64) -> ReconResult<Option<Partner>> {
        self.inner.get_partner(id).await
    }

    async fn insert_shipment(&self, shipment: NewShipment) -> ReconResult<Shipment> {
        self.inner.insert_shipment(shipment).await
    }

    async fn find_shipment_by_tracking(
        &self,
        partner_id: Option<i64>,
        tracking_number: &str,
    ) -> ReconResult<Option<Shipment>> {
        self.inner
            .find_shipment_by_tracking(partner_id, tracking_number)
            .await
    }

    async fn insert_reconciliation(&self, new: NewReconciliation) -> ReconResult<Reconciliation> {
        self.inner.insert_reconciliation(new).await
    }

    async fn get_reconciliation(&self, id: i64) -> ReconResult<Option<Reconciliation>> {
        self.inner.get_reconciliation(id).await
    }

    async fn list_reconciliation_items(
        &self,
        reconciliation_id: i64,
    ) -> ReconResult<Vec<ReconciliationItem>> {
        self.inner.list_reconciliation_items(reconciliation_id).await
    }

    async fn update_reconciliation_status(
        &self,
        id: i64,
        expected: ReconciliationStatus,
        target: ReconciliationStatus,
    ) -> ReconResult<Reconciliation> {
        self.inner
            .update_reconciliation_status(id, expected, target)
            .await
    }

    async fn apply_reconciliation_items(
        &self,
        reconciliation_id: i64,
        items: Vec<NewReconciliationItem>,
    ) -> ReconResult<ReconciliationTotals> {
        tokio::time::sleep(self.delay_before_apply).await;
        let totals = self
            .inner
            .apply_reconciliation_items(reconciliation_id, items)
            .await?;
        tokio::time::sleep(self.delay_after_apply).await;
        Ok(totals)
    }

    async fn insert_upload(&self, new: NewUpload) -> ReconResult<ReconciliationUpload> {
        self.inner.insert_upload(new).await
    }

    async fn get_upload(&self, id: i64) -> ReconResult<Option<ReconciliationUpload>> {
        self.inner.get_upload(id).await
    }

    async fn list_upload_items(&self, upload_id: i64) -> ReconResult<Vec<UploadItem>> {
        self.inner.list_upload_items(upload_id).await
    }

    async fn mark_upload_processing(&self, id: i64) -> ReconResult<()> {
        self.inner.mark_upload_processing(id).await
    }

    async fn complete_upload(
        &self,
        id: i64,
        summary: UploadSummary,
        items: Vec<NewUploadItem>,
    ) -> ReconResult<()> {
        self.inner.complete_upload(id, summary, items).await
    }

    async fn fail_upload(&self, id: i64, message: &str) -> ReconResult<()> {
        self.inner.fail_upload(id, message).await
    }

    async fn list_stale_processing_uploads(&self, cutoff: DateTime<Utc>) -> ReconResult<Vec<i64>> {
        self.inner.list_stale_processing_uploads(cutoff).await
    }
}

/// 流水线超时打断对账单回写: 上传判失败, 明细与汇总必须互相一致
/// (要么都没写入, 要么都写入), 不允许只有明细没有汇总的中间态
async fn run_stalled_writeback(
    delay_before_apply: Duration,
    delay_after_apply: Duration,
) -> (Reconciliation, Vec<ReconciliationItem>, ReconciliationUpload) {
    let mem = Arc::new(MemStore::new());
    let partner = mem.seed_partner("顺丰", PartnerType::Carrier);
    seed_shipment(&mem, partner.id, 1, "SF0001", "80.00", "8.00").await;

    let store: Arc<dyn ReconStore> = Arc::new(StallingStore {
        inner: mem.clone(),
        delay_before_apply,
        delay_after_apply,
    });
    let locks = ReconLocks::new();
    let uploads = Arc::new(UploadService::new(
        store.clone(),
        locks.clone(),
        1024 * 1024,
        Duration::from_millis(100),
    ));
    let workflow = WorkflowService::new(store, locks);

    let recon = workflow
        .create(CreateReconciliation {
            recon_type: PartnerType::Carrier,
            partner_id: Some(partner.id),
            period_start: Some(ymd(2024, 1, 1)),
            period_end: Some(ymd(2024, 1, 31)),
            notes: None,
        })
        .await
        .unwrap();

    let upload = uploads
        .submit(carrier_submit(
            "a.csv",
            "tracking_number,cod_amount,shipping_fee\nSF0001,80.00,8.00\n".to_string(),
            partner.id,
            Some(recon.id),
        ))
        .await
        .unwrap();
    let upload = wait_terminal(&mem, upload.id).await;
    assert_eq!(upload.status, UploadStatus::Failed);
    assert_eq!(upload.error_message.as_deref(), Some("processing timeout"));

    let recon = mem.get_reconciliation(recon.id).await.unwrap().unwrap();
    let items = mem.list_reconciliation_items(recon.id).await.unwrap();
    (recon, items, upload)
}

#[tokio::test]
async fn timeout_before_writeback_leaves_reconciliation_untouched() {
    let (recon, items, _) =
        run_stalled_writeback(Duration::from_secs(10), Duration::ZERO).await;
    assert_eq!(items.len(), 0);
    assert_eq!(recon.total_orders, 0);
    assert_eq!(recon.net_amount, dec("0"));
}

#[tokio::test]
async fn timeout_after_writeback_keeps_items_and_totals_consistent() {
    let (recon, items, _) =
        run_stalled_writeback(Duration::ZERO, Duration::from_secs(10)).await;
    assert_eq!(items.len(), 1);
    assert_eq!(recon.total_orders, 1);
    assert_eq!(recon.total_amount, dec("80.00"));
    assert_eq!(recon.net_amount, dec("72.00"));
}

/// 看门狗把卡死的 processing 上传判失败
#[tokio::test]
async fn watchdog_expires_stuck_uploads() {
    let h = harness();
    let stuck = h
        .store
        .insert_upload(NewUpload {
            file_name: "stuck.csv".to_string(),
            upload_type: PartnerType::Carrier,
            partner_id: None,
            reconciliation_id: None,
            period_start: None,
            period_end: None,
        })
        .await
        .unwrap();
    h.store.mark_upload_processing(stuck.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let expired = h.uploads.expire_stale(Duration::from_millis(1)).await.unwrap();
    assert_eq!(expired, 1);

    let upload = h.store.get_upload(stuck.id).await.unwrap().unwrap();
    assert_eq!(upload.status, UploadStatus::Failed);
    assert_eq!(upload.error_message.as_deref(), Some("processing timeout"));

    // 终态不可覆盖
    h.store.fail_upload(stuck.id, "other").await.unwrap();
    let upload = h.store.get_upload(stuck.id).await.unwrap().unwrap();
    assert_eq!(upload.error_message.as_deref(), Some("processing timeout"));
}
