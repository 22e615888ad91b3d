use super::matcher::MatchedRow;
use crate::error::{ReconError, Result};
use crate::models::{
    NewReconciliationItem, PartnerType, ReconciliationStatus, RowStatus, UploadSummary,
};
use crate::store::ReconStore;
use bigdecimal::{BigDecimal, Zero};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 对账单级单写者锁表
///
/// 冻结判定 (pending 守卫) 与字段重算必须在同一把锁内完成:
/// 同一对账单的多个并发上传串行回写, 状态跳转也不与回写交错。
#[derive(Clone, Default)]
pub struct ReconLocks {
    inner: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl ReconLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, reconciliation_id: i64) -> Arc<Mutex<()>> {
        self.inner
            .entry(reconciliation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// 全量行集 -> 上传级汇总, 纯折叠, 幂等
///
/// 口径: total_amount_file 为全部行的文件侧 (COD + 运费) 之和;
/// total_amount_system 仅累计 matched/mismatched 行的系统侧;
/// difference_amount = 两者之差, 等于逐行差额之和
/// (not_found 行以文件侧全额计入差额)。
pub fn summarize(rows: &[MatchedRow]) -> UploadSummary {
    let mut total_records = 0;
    let mut matched_records = 0;
    let mut unmatched_records = 0;
    let mut total_amount_file = BigDecimal::zero();
    let mut total_amount_system = BigDecimal::zero();

    for row in rows {
        total_records += 1;
        match row.item.reconciliation_status {
            RowStatus::Matched => matched_records += 1,
            RowStatus::Mismatched => unmatched_records += 1,
            // not_found 与无法解析的行不入桶
            RowStatus::NotFound => {}
        }
        total_amount_file =
            total_amount_file + &row.item.cod_amount_file + &row.item.shipping_fee_file;
        if row.item.reconciliation_status != RowStatus::NotFound {
            total_amount_system =
                total_amount_system + &row.item.cod_amount_system + &row.item.shipping_fee_system;
        }
    }

    let difference_amount = &total_amount_file - &total_amount_system;
    UploadSummary {
        total_records,
        matched_records,
        unmatched_records,
        total_amount_file,
        total_amount_system,
        difference_amount,
    }
}

/// 差异聚合服务: 上传结果回写所属对账单
pub struct Aggregator {
    store: Arc<dyn ReconStore>,
    locks: ReconLocks,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ReconStore>, locks: ReconLocks) -> Self {
        Self { store, locks }
    }

    /// 把 matched/mismatched 行按订单去重后写入对账单明细,
    /// 并从全量明细重算汇总。对账单已离开 pending 则整体拒绝。
    pub async fn apply_to_reconciliation(
        &self,
        reconciliation_id: i64,
        upload_type: PartnerType,
        rows: &[MatchedRow],
    ) -> Result<()> {
        let lock = self.locks.lock_for(reconciliation_id);
        let _guard = lock.lock().await;

        let recon = self
            .store
            .get_reconciliation(reconciliation_id)
            .await?
            .ok_or_else(|| ReconError::NotFound(format!("reconciliation {reconciliation_id}")))?;
        if recon.status != ReconciliationStatus::Pending {
            return Err(ReconError::ReconciliationFrozen(reconciliation_id));
        }

        // 按 order_id 去重, 同一订单后出现的行覆盖先出现的 (与运单查找同口径)
        let mut by_order: IndexMap<i64, NewReconciliationItem> = IndexMap::new();
        for row in rows {
            if row.item.reconciliation_status == RowStatus::NotFound {
                continue;
            }
            let Some(shipment) = &row.shipment else {
                continue;
            };
            let net_amount = upload_type.item_net_amount(
                &shipment.order_amount,
                &shipment.shipping_fee,
                &row.commission,
            );
            by_order.insert(
                shipment.order_id,
                NewReconciliationItem {
                    order_id: shipment.order_id,
                    order_no: shipment.order_no.clone(),
                    tracking_number: shipment.tracking_number.clone(),
                    customer_name: shipment.customer_name.clone(),
                    order_amount: shipment.order_amount.clone(),
                    shipping_fee: shipment.shipping_fee.clone(),
                    cod_amount: shipment.cod_amount.clone(),
                    net_amount,
                },
            );
        }

        let upserted = by_order.len();
        // 明细与汇总在存储层一次原子操作内落库, 重算基于存量全集,
        // 重复回写同一上传结果不改变结论
        let totals = self
            .store
            .apply_reconciliation_items(reconciliation_id, by_order.into_values().collect())
            .await?;

        tracing::info!(
            "对账单 {} ({}): 回写 {} 个订单, 汇总共 {} 个订单",
            reconciliation_id,
            recon.code,
            upserted,
            totals.total_orders
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUploadItem, Shipment};
    use chrono::Utc;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn row(
        status: RowStatus,
        cod_file: &str,
        cod_sys: &str,
        fee_file: &str,
        fee_sys: &str,
    ) -> MatchedRow {
        let difference = match status {
            RowStatus::NotFound => dec(cod_file) + dec(fee_file),
            _ => (dec(cod_file) - dec(cod_sys)) + (dec(fee_file) - dec(fee_sys)),
        };
        let shipment = match status {
            RowStatus::NotFound => None,
            _ => Some(Shipment {
                id: 1,
                order_id: 1,
                order_no: "SO1".to_string(),
                partner_id: 1,
                tracking_number: "SF1".to_string(),
                customer_name: "测试".to_string(),
                order_amount: dec(cod_sys),
                shipping_fee: dec(fee_sys),
                cod_amount: dec(cod_sys),
                created_at: Utc::now(),
            }),
        };
        MatchedRow {
            item: NewUploadItem {
                tracking_number: Some("SF1".to_string()),
                reconciliation_status: status,
                cod_amount_file: dec(cod_file),
                cod_amount_system: if status == RowStatus::NotFound {
                    BigDecimal::zero()
                } else {
                    dec(cod_sys)
                },
                shipping_fee_file: dec(fee_file),
                shipping_fee_system: if status == RowStatus::NotFound {
                    BigDecimal::zero()
                } else {
                    dec(fee_sys)
                },
                difference_amount: difference,
            },
            shipment,
            commission: BigDecimal::zero(),
        }
    }

    /// 10 行: 7 行全等, 2 行运费差 5000, 1 行台账未命中
    #[test]
    fn scenario_seven_matched_two_deltas_one_unknown() {
        let mut rows = Vec::new();
        for _ in 0..7 {
            rows.push(row(RowStatus::Matched, "100", "100", "10", "10"));
        }
        for _ in 0..2 {
            rows.push(row(RowStatus::Mismatched, "100", "100", "5010", "10"));
        }
        rows.push(row(RowStatus::NotFound, "300", "0", "20", "0"));

        let summary = summarize(&rows);
        assert_eq!(summary.total_records, 10);
        assert_eq!(summary.matched_records, 7);
        assert_eq!(summary.unmatched_records, 2);
        // 差额 = 两笔 5000 运费差 + 未知行文件侧全额 320
        assert_eq!(summary.difference_amount, dec("10320"));
        assert_eq!(
            summary.difference_amount,
            &summary.total_amount_file - &summary.total_amount_system
        );
    }

    #[test]
    fn summarize_is_idempotent() {
        let rows = vec![
            row(RowStatus::Matched, "50", "50", "5", "5"),
            row(RowStatus::Mismatched, "80", "75", "5", "5"),
        ];
        let first = summarize(&rows);
        let second = summarize(&rows);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_upload_summarizes_to_zero() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.matched_records, 0);
        assert_eq!(summary.unmatched_records, 0);
        assert_eq!(summary.difference_amount, BigDecimal::zero());
    }

    #[test]
    fn counts_satisfy_bucket_invariant() {
        let rows = vec![
            row(RowStatus::Matched, "1", "1", "1", "1"),
            row(RowStatus::NotFound, "9", "0", "1", "0"),
            row(RowStatus::Mismatched, "2", "1", "1", "1"),
        ];
        let summary = summarize(&rows);
        assert!(summary.matched_records + summary.unmatched_records <= summary.total_records);
    }
}
