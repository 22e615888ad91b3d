use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 内部运单台账行
///
/// 由平台同步作业写入; 匹配服务按运单号查找, 只读不改。
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Shipment {
    pub id: i64,
    pub order_id: i64,
    pub order_no: String,
    pub partner_id: i64,
    pub tracking_number: String,
    pub customer_name: String,
    pub order_amount: BigDecimal,
    pub shipping_fee: BigDecimal,
    pub cod_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

/// 新建运单 (同步作业与测试种子数据)
#[derive(Debug, Clone)]
pub struct NewShipment {
    pub order_id: i64,
    pub order_no: String,
    pub partner_id: i64,
    pub tracking_number: String,
    pub customer_name: String,
    pub order_amount: BigDecimal,
    pub shipping_fee: BigDecimal,
    pub cod_amount: BigDecimal,
}
