use super::ReconStore;
use crate::error::{ReconError, Result};
use crate::models::{
    NewReconciliation, NewReconciliationItem, NewShipment, NewUpload, NewUploadItem, Partner,
    PartnerType, Reconciliation, ReconciliationItem, ReconciliationStatus, ReconciliationTotals,
    ReconciliationUpload, Shipment, UploadItem, UploadSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;
use std::time::Duration;

/// 创建数据库连接池
///
/// 负载以上传流水线的逐行运单查询为主, 全部是短索引查询;
/// 慢查询阈值 2 秒足以暴露缺索引或被锁等待拖住的语句。
pub async fn create_pool(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    let mut connect_options = PgConnectOptions::from_str(database_url)?;

    connect_options = connect_options
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(2));

    // 每个在途上传占一个连接跑匹配查询, 留少量给 API 读
    PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options)
        .await
}

/// Postgres 存储 (schema 见 migrations/0001_init.sql)
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECONCILIATION_COLS: &str = "id, code, recon_type, partner_id, period_start, period_end, \
     status, total_orders, total_amount, total_shipping_fee, net_amount, notes, created_at";

const UPLOAD_COLS: &str = "id, file_name, upload_type, partner_id, reconciliation_id, \
     period_start, period_end, status, total_records, matched_records, unmatched_records, \
     total_amount_file, total_amount_system, difference_amount, error_message, created_at";

#[async_trait]
impl ReconStore for PgStore {
    async fn list_partners(&self, partner_type: PartnerType) -> Result<Vec<Partner>> {
        let partners = sqlx::query_as::<_, Partner>(
            r#"
            SELECT id, name, partner_type
            FROM partners
            WHERE partner_type = $1
            ORDER BY id
            "#,
        )
        .bind(partner_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(partners)
    }

    async fn get_partner(&self, id: i64) -> Result<Option<Partner>> {
        let partner = sqlx::query_as::<_, Partner>(
            "SELECT id, name, partner_type FROM partners WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(partner)
    }

    async fn insert_shipment(&self, new: NewShipment) -> Result<Shipment> {
        let shipment = sqlx::query_as::<_, Shipment>(
            r#"
            INSERT INTO shipments
                (order_id, order_no, partner_id, tracking_number, customer_name,
                 order_amount, shipping_fee, cod_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, order_id, order_no, partner_id, tracking_number, customer_name,
                      order_amount, shipping_fee, cod_amount, created_at
            "#,
        )
        .bind(new.order_id)
        .bind(&new.order_no)
        .bind(new.partner_id)
        .bind(&new.tracking_number)
        .bind(&new.customer_name)
        .bind(new.order_amount)
        .bind(new.shipping_fee)
        .bind(new.cod_amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(shipment)
    }

    async fn find_shipment_by_tracking(
        &self,
        partner_id: Option<i64>,
        tracking_number: &str,
    ) -> Result<Option<Shipment>> {
        // 运单号重复时取创建最晚的一条
        let shipment = sqlx::query_as::<_, Shipment>(
            r#"
            SELECT id, order_id, order_no, partner_id, tracking_number, customer_name,
                   order_amount, shipping_fee, cod_amount, created_at
            FROM shipments
            WHERE tracking_number = $1
              AND ($2::BIGINT IS NULL OR partner_id = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(tracking_number)
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(shipment)
    }

    async fn insert_reconciliation(&self, new: NewReconciliation) -> Result<Reconciliation> {
        let recon = sqlx::query_as::<_, Reconciliation>(&format!(
            r#"
            INSERT INTO reconciliations
                (code, recon_type, partner_id, period_start, period_end, status, notes)
            VALUES ($1 || '-' || lpad(nextval('reconciliation_code_seq')::TEXT, 6, '0'),
                    $2, $3, $4, $5, 'pending', $6)
            RETURNING {RECONCILIATION_COLS}
            "#
        ))
        .bind(new.recon_type.code_prefix())
        .bind(new.recon_type)
        .bind(new.partner_id)
        .bind(new.period_start)
        .bind(new.period_end)
        .bind(&new.notes)
        .fetch_one(&self.pool)
        .await?;
        Ok(recon)
    }

    async fn get_reconciliation(&self, id: i64) -> Result<Option<Reconciliation>> {
        let recon = sqlx::query_as::<_, Reconciliation>(&format!(
            "SELECT {RECONCILIATION_COLS} FROM reconciliations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(recon)
    }

    async fn list_reconciliation_items(
        &self,
        reconciliation_id: i64,
    ) -> Result<Vec<ReconciliationItem>> {
        let items = sqlx::query_as::<_, ReconciliationItem>(
            r#"
            SELECT id, reconciliation_id, order_id, order_no, tracking_number, customer_name,
                   order_amount, shipping_fee, cod_amount, net_amount
            FROM reconciliation_items
            WHERE reconciliation_id = $1
            ORDER BY id
            "#,
        )
        .bind(reconciliation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn update_reconciliation_status(
        &self,
        id: i64,
        expected: ReconciliationStatus,
        target: ReconciliationStatus,
    ) -> Result<Reconciliation> {
        let updated = sqlx::query_as::<_, Reconciliation>(&format!(
            r#"
            UPDATE reconciliations
            SET status = $3
            WHERE id = $1 AND status = $2
            RETURNING {RECONCILIATION_COLS}
            "#
        ))
        .bind(id)
        .bind(expected)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(recon) => Ok(recon),
            None => match self.get_reconciliation(id).await? {
                Some(current) => Err(ReconError::Processing(format!(
                    "reconciliation {id} status changed concurrently (expected {expected}, found {})",
                    current.status
                ))),
                None => Err(ReconError::NotFound(format!("reconciliation {id}"))),
            },
        }
    }

    async fn apply_reconciliation_items(
        &self,
        reconciliation_id: i64,
        items: Vec<NewReconciliationItem>,
    ) -> Result<ReconciliationTotals> {
        // 明细写入与汇总重算同一事务, 中途取消或宕机整体回滚
        let mut tx = self.pool.begin().await?;

        if !items.is_empty() {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO reconciliation_items (
                    reconciliation_id, order_id, order_no, tracking_number, customer_name,
                    order_amount, shipping_fee, cod_amount, net_amount
                ) ",
            );
            query_builder.push_values(items, |mut b, item| {
                b.push_bind(reconciliation_id)
                    .push_bind(item.order_id)
                    .push_bind(item.order_no)
                    .push_bind(item.tracking_number)
                    .push_bind(item.customer_name)
                    .push_bind(item.order_amount)
                    .push_bind(item.shipping_fee)
                    .push_bind(item.cod_amount)
                    .push_bind(item.net_amount);
            });
            query_builder.push(
                " ON CONFLICT (reconciliation_id, order_id) DO UPDATE SET
                    order_no = EXCLUDED.order_no,
                    tracking_number = EXCLUDED.tracking_number,
                    customer_name = EXCLUDED.customer_name,
                    order_amount = EXCLUDED.order_amount,
                    shipping_fee = EXCLUDED.shipping_fee,
                    cod_amount = EXCLUDED.cod_amount,
                    net_amount = EXCLUDED.net_amount",
            );
            query_builder.build().execute(&mut *tx).await?;
        }

        let totals = sqlx::query_as::<_, ReconciliationTotals>(
            r#"
            UPDATE reconciliations r
            SET total_orders = agg.total_orders,
                total_amount = agg.total_amount,
                total_shipping_fee = agg.total_shipping_fee,
                net_amount = agg.net_amount
            FROM (
                SELECT COUNT(*)::INT AS total_orders,
                       COALESCE(SUM(order_amount), 0) AS total_amount,
                       COALESCE(SUM(shipping_fee), 0) AS total_shipping_fee,
                       COALESCE(SUM(net_amount), 0) AS net_amount
                FROM reconciliation_items
                WHERE reconciliation_id = $1
            ) agg
            WHERE r.id = $1
            RETURNING agg.total_orders, agg.total_amount, agg.total_shipping_fee, agg.net_amount
            "#,
        )
        .bind(reconciliation_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ReconError::NotFound(format!("reconciliation {reconciliation_id}")))?;

        tx.commit().await?;
        Ok(totals)
    }

    async fn insert_upload(&self, new: NewUpload) -> Result<ReconciliationUpload> {
        let upload = sqlx::query_as::<_, ReconciliationUpload>(&format!(
            r#"
            INSERT INTO reconciliation_uploads
                (file_name, upload_type, partner_id, reconciliation_id, period_start, period_end)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {UPLOAD_COLS}
            "#
        ))
        .bind(&new.file_name)
        .bind(new.upload_type)
        .bind(new.partner_id)
        .bind(new.reconciliation_id)
        .bind(new.period_start)
        .bind(new.period_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(upload)
    }

    async fn get_upload(&self, id: i64) -> Result<Option<ReconciliationUpload>> {
        let upload = sqlx::query_as::<_, ReconciliationUpload>(&format!(
            "SELECT {UPLOAD_COLS} FROM reconciliation_uploads WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(upload)
    }

    async fn list_upload_items(&self, upload_id: i64) -> Result<Vec<UploadItem>> {
        let items = sqlx::query_as::<_, UploadItem>(
            r#"
            SELECT id, upload_id, tracking_number, reconciliation_status,
                   cod_amount_file, cod_amount_system, shipping_fee_file, shipping_fee_system,
                   difference_amount
            FROM upload_items
            WHERE upload_id = $1
            ORDER BY id
            "#,
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn mark_upload_processing(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE reconciliation_uploads SET status = 'processing' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_upload(
        &self,
        id: i64,
        summary: UploadSummary,
        items: Vec<NewUploadItem>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // 终态守卫与汇总写入同一条 UPDATE; 守卫不过则整体放弃
        let updated = sqlx::query(
            r#"
            UPDATE reconciliation_uploads
            SET status = 'completed',
                total_records = $2, matched_records = $3, unmatched_records = $4,
                total_amount_file = $5, total_amount_system = $6, difference_amount = $7
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(summary.total_records)
        .bind(summary.matched_records)
        .bind(summary.unmatched_records)
        .bind(summary.total_amount_file)
        .bind(summary.total_amount_system)
        .bind(summary.difference_amount)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(());
        }

        if !items.is_empty() {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO upload_items (
                    upload_id, tracking_number, reconciliation_status,
                    cod_amount_file, cod_amount_system, shipping_fee_file, shipping_fee_system,
                    difference_amount
                ) ",
            );
            query_builder.push_values(items, |mut b, item| {
                b.push_bind(id)
                    .push_bind(item.tracking_number)
                    .push_bind(item.reconciliation_status)
                    .push_bind(item.cod_amount_file)
                    .push_bind(item.cod_amount_system)
                    .push_bind(item.shipping_fee_file)
                    .push_bind(item.shipping_fee_system)
                    .push_bind(item.difference_amount);
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fail_upload(&self, id: i64, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reconciliation_uploads
            SET status = 'failed', error_message = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_stale_processing_uploads(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM reconciliation_uploads WHERE status = 'processing' AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
