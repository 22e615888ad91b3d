use super::ReconStore;
use crate::error::{ReconError, Result};
use crate::models::{
    NewReconciliation, NewReconciliationItem, NewShipment, NewUpload, NewUploadItem, Partner,
    PartnerType, Reconciliation, ReconciliationItem, ReconciliationStatus, ReconciliationTotals,
    ReconciliationUpload, Shipment, UploadItem, UploadStatus, UploadSummary,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// 内存存储 (DashMap 实现)
///
/// 用于测试与内嵌场景。上传终态写入在持有上传记录条目锁的
/// 前提下完成, 读者不会看到中间状态的汇总字段。
#[derive(Default)]
pub struct MemStore {
    seq: AtomicI64,
    partners: DashMap<i64, Partner>,
    shipments: DashMap<i64, Shipment>,
    reconciliations: DashMap<i64, Reconciliation>,
    recon_items: DashMap<i64, Vec<ReconciliationItem>>,
    uploads: DashMap<i64, ReconciliationUpload>,
    upload_items: DashMap<i64, Vec<UploadItem>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 合作方种子数据 (合作方管理属外部模块, 这里仅供测试/内嵌用)
    pub fn seed_partner(&self, name: &str, partner_type: PartnerType) -> Partner {
        let partner = Partner {
            id: self.next_id(),
            name: name.to_string(),
            partner_type,
        };
        self.partners.insert(partner.id, partner.clone());
        partner
    }
}

#[async_trait]
impl ReconStore for MemStore {
    async fn list_partners(&self, partner_type: PartnerType) -> Result<Vec<Partner>> {
        let mut found: Vec<Partner> = self
            .partners
            .iter()
            .filter(|p| p.partner_type == partner_type)
            .map(|p| p.clone())
            .collect();
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    async fn get_partner(&self, id: i64) -> Result<Option<Partner>> {
        Ok(self.partners.get(&id).map(|p| p.clone()))
    }

    async fn insert_shipment(&self, new: NewShipment) -> Result<Shipment> {
        let shipment = Shipment {
            id: self.next_id(),
            order_id: new.order_id,
            order_no: new.order_no,
            partner_id: new.partner_id,
            tracking_number: new.tracking_number,
            customer_name: new.customer_name,
            order_amount: new.order_amount,
            shipping_fee: new.shipping_fee,
            cod_amount: new.cod_amount,
            created_at: Utc::now(),
        };
        self.shipments.insert(shipment.id, shipment.clone());
        Ok(shipment)
    }

    async fn find_shipment_by_tracking(
        &self,
        partner_id: Option<i64>,
        tracking_number: &str,
    ) -> Result<Option<Shipment>> {
        // 运单号重复时取创建最晚的一条
        let best = self
            .shipments
            .iter()
            .filter(|s| s.tracking_number == tracking_number)
            .filter(|s| partner_id.map_or(true, |pid| s.partner_id == pid))
            .max_by_key(|s| (s.created_at, s.id))
            .map(|s| s.clone());
        Ok(best)
    }

    async fn insert_reconciliation(&self, new: NewReconciliation) -> Result<Reconciliation> {
        let id = self.next_id();
        let recon = Reconciliation {
            id,
            code: format!("{}-{:06}", new.recon_type.code_prefix(), id),
            recon_type: new.recon_type,
            partner_id: new.partner_id,
            period_start: new.period_start,
            period_end: new.period_end,
            status: ReconciliationStatus::Pending,
            total_orders: 0,
            total_amount: BigDecimal::zero(),
            total_shipping_fee: BigDecimal::zero(),
            net_amount: BigDecimal::zero(),
            notes: new.notes,
            created_at: Utc::now(),
        };
        self.reconciliations.insert(id, recon.clone());
        Ok(recon)
    }

    async fn get_reconciliation(&self, id: i64) -> Result<Option<Reconciliation>> {
        Ok(self.reconciliations.get(&id).map(|r| r.clone()))
    }

    async fn list_reconciliation_items(
        &self,
        reconciliation_id: i64,
    ) -> Result<Vec<ReconciliationItem>> {
        Ok(self
            .recon_items
            .get(&reconciliation_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn update_reconciliation_status(
        &self,
        id: i64,
        expected: ReconciliationStatus,
        target: ReconciliationStatus,
    ) -> Result<Reconciliation> {
        let mut entry = self
            .reconciliations
            .get_mut(&id)
            .ok_or_else(|| ReconError::NotFound(format!("reconciliation {id}")))?;
        if entry.status != expected {
            return Err(ReconError::Processing(format!(
                "reconciliation {id} status changed concurrently (expected {expected}, found {})",
                entry.status
            )));
        }
        entry.status = target;
        Ok(entry.clone())
    }

    async fn apply_reconciliation_items(
        &self,
        reconciliation_id: i64,
        items: Vec<NewReconciliationItem>,
    ) -> Result<ReconciliationTotals> {
        // 无 await, 明细写入与汇总重算在一次 poll 内完成, 取消不可分割
        let mut recon = self
            .reconciliations
            .get_mut(&reconciliation_id)
            .ok_or_else(|| ReconError::NotFound(format!("reconciliation {reconciliation_id}")))?;
        let mut entry = self.recon_items.entry(reconciliation_id).or_default();
        for new in items {
            match entry.iter_mut().find(|i| i.order_id == new.order_id) {
                Some(existing) => {
                    existing.order_no = new.order_no;
                    existing.tracking_number = new.tracking_number;
                    existing.customer_name = new.customer_name;
                    existing.order_amount = new.order_amount;
                    existing.shipping_fee = new.shipping_fee;
                    existing.cod_amount = new.cod_amount;
                    existing.net_amount = new.net_amount;
                }
                None => {
                    let id = self.next_id();
                    entry.push(ReconciliationItem {
                        id,
                        reconciliation_id,
                        order_id: new.order_id,
                        order_no: new.order_no,
                        tracking_number: new.tracking_number,
                        customer_name: new.customer_name,
                        order_amount: new.order_amount,
                        shipping_fee: new.shipping_fee,
                        cod_amount: new.cod_amount,
                        net_amount: new.net_amount,
                    });
                }
            }
        }

        let mut total_amount = BigDecimal::zero();
        let mut total_shipping_fee = BigDecimal::zero();
        let mut net_amount = BigDecimal::zero();
        for item in entry.iter() {
            total_amount = total_amount + &item.order_amount;
            total_shipping_fee = total_shipping_fee + &item.shipping_fee;
            net_amount = net_amount + &item.net_amount;
        }
        let totals = ReconciliationTotals {
            total_orders: entry.len() as i32,
            total_amount,
            total_shipping_fee,
            net_amount,
        };
        recon.total_orders = totals.total_orders;
        recon.total_amount = totals.total_amount.clone();
        recon.total_shipping_fee = totals.total_shipping_fee.clone();
        recon.net_amount = totals.net_amount.clone();
        Ok(totals)
    }

    async fn insert_upload(&self, new: NewUpload) -> Result<ReconciliationUpload> {
        let id = self.next_id();
        let upload = ReconciliationUpload {
            id,
            file_name: new.file_name,
            upload_type: new.upload_type,
            partner_id: new.partner_id,
            reconciliation_id: new.reconciliation_id,
            period_start: new.period_start,
            period_end: new.period_end,
            status: UploadStatus::Pending,
            total_records: 0,
            matched_records: 0,
            unmatched_records: 0,
            total_amount_file: BigDecimal::zero(),
            total_amount_system: BigDecimal::zero(),
            difference_amount: BigDecimal::zero(),
            error_message: None,
            created_at: Utc::now(),
        };
        self.uploads.insert(id, upload.clone());
        Ok(upload)
    }

    async fn get_upload(&self, id: i64) -> Result<Option<ReconciliationUpload>> {
        Ok(self.uploads.get(&id).map(|u| u.clone()))
    }

    async fn list_upload_items(&self, upload_id: i64) -> Result<Vec<UploadItem>> {
        Ok(self
            .upload_items
            .get(&upload_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn mark_upload_processing(&self, id: i64) -> Result<()> {
        if let Some(mut entry) = self.uploads.get_mut(&id) {
            if entry.status == UploadStatus::Pending {
                entry.status = UploadStatus::Processing;
            }
        }
        Ok(())
    }

    async fn complete_upload(
        &self,
        id: i64,
        summary: UploadSummary,
        items: Vec<NewUploadItem>,
    ) -> Result<()> {
        let Some(mut entry) = self.uploads.get_mut(&id) else {
            return Err(ReconError::NotFound(format!("upload {id}")));
        };
        // 终态不可覆盖 (看门狗可能已先行判死)
        if entry.status != UploadStatus::Processing {
            return Ok(());
        }
        let rows: Vec<UploadItem> = items
            .into_iter()
            .map(|i| UploadItem {
                id: self.next_id(),
                upload_id: id,
                tracking_number: i.tracking_number,
                reconciliation_status: i.reconciliation_status,
                cod_amount_file: i.cod_amount_file,
                cod_amount_system: i.cod_amount_system,
                shipping_fee_file: i.shipping_fee_file,
                shipping_fee_system: i.shipping_fee_system,
                difference_amount: i.difference_amount,
            })
            .collect();
        self.upload_items.insert(id, rows);
        entry.total_records = summary.total_records;
        entry.matched_records = summary.matched_records;
        entry.unmatched_records = summary.unmatched_records;
        entry.total_amount_file = summary.total_amount_file;
        entry.total_amount_system = summary.total_amount_system;
        entry.difference_amount = summary.difference_amount;
        entry.status = UploadStatus::Completed;
        Ok(())
    }

    async fn fail_upload(&self, id: i64, message: &str) -> Result<()> {
        let Some(mut entry) = self.uploads.get_mut(&id) else {
            return Err(ReconError::NotFound(format!("upload {id}")));
        };
        if entry.status != UploadStatus::Processing {
            return Ok(());
        }
        entry.status = UploadStatus::Failed;
        entry.error_message = Some(message.to_string());
        Ok(())
    }

    async fn list_stale_processing_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        Ok(self
            .uploads
            .iter()
            .filter(|u| u.status == UploadStatus::Processing && u.created_at < cutoff)
            .map(|u| u.id)
            .collect())
    }
}
