use super::normalizer::RawRow;
use crate::error::Result;
use crate::models::{NewUploadItem, PartnerType, RowStatus, SettlementRow, Shipment};
use crate::store::ReconStore;
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;
use std::sync::Arc;

// 列名别名表 (表头已统一小写)
const CARRIER_TRACKING_ALIASES: &[&str] = &["tracking_number", "tracking_no", "waybill_no", "waybill"];
const PLATFORM_TRACKING_ALIASES: &[&str] = &["tracking_number", "tracking_no", "waybill_no", "order_no"];
const COD_ALIASES: &[&str] = &["cod_amount", "cod", "collected_amount"];
const FEE_ALIASES: &[&str] = &["shipping_fee", "freight", "freight_fee", "delivery_fee"];
const COMMISSION_ALIASES: &[&str] = &["commission", "commission_fee", "platform_fee"];

fn cell<'a>(row: &'a RawRow, aliases: &[&str]) -> Option<&'a str> {
    aliases.iter().find_map(|k| row.get(*k)).map(String::as_str)
}

/// 金额解析: 去千分位逗号; 不可解析按零计
fn parse_amount(row: &RawRow, aliases: &[&str]) -> BigDecimal {
    cell(row, aliases)
        .map(|raw| raw.replace(',', ""))
        .and_then(|raw| BigDecimal::from_str(raw.trim()).ok())
        .unwrap_or_else(BigDecimal::zero)
}

/// 上传类型即文件格式能力: 按变体分发列语义与净额口径,
/// 新增合作方格式只需新增分支。
impl PartnerType {
    fn tracking_aliases(&self) -> &'static [&'static str] {
        match self {
            PartnerType::Carrier => CARRIER_TRACKING_ALIASES,
            PartnerType::Platform => PLATFORM_TRACKING_ALIASES,
        }
    }

    /// 从原始行提取运单号与对方报告金额
    pub fn parse_row(&self, row: &RawRow) -> SettlementRow {
        let tracking_number = cell(row, self.tracking_aliases())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let commission = match self {
            PartnerType::Carrier => BigDecimal::zero(),
            PartnerType::Platform => parse_amount(row, COMMISSION_ALIASES),
        };
        SettlementRow {
            tracking_number,
            cod_amount: parse_amount(row, COD_ALIASES),
            shipping_fee: parse_amount(row, FEE_ALIASES),
            commission,
        }
    }

    /// 明细净额口径: 订单额 - 运费, 平台单再扣佣金
    pub fn item_net_amount(
        &self,
        order_amount: &BigDecimal,
        shipping_fee: &BigDecimal,
        commission: &BigDecimal,
    ) -> BigDecimal {
        match self {
            PartnerType::Carrier => order_amount - shipping_fee,
            PartnerType::Platform => order_amount - shipping_fee - commission,
        }
    }
}

/// 单行匹配产物: 上传明细 + 命中的运单快照 (供对账单明细生成)
#[derive(Debug, Clone)]
pub struct MatchedRow {
    pub item: NewUploadItem,
    pub shipment: Option<Shipment>,
    /// 文件侧佣金, 对账单净额口径使用
    pub commission: BigDecimal,
}

/// 匹配服务: 结算行 vs 内部运单台账
///
/// 只读台账, 仅产出比对结果; matched 要求 COD 与运费精确相等,
/// 任何非零差额记 mismatched。
pub struct Matcher {
    store: Arc<dyn ReconStore>,
}

impl Matcher {
    pub fn new(store: Arc<dyn ReconStore>) -> Self {
        Self { store }
    }

    /// 全量行匹配, 行内顺序无对外语义, 只有最终汇总可见
    pub async fn match_rows(
        &self,
        partner_id: Option<i64>,
        upload_type: PartnerType,
        rows: &[RawRow],
    ) -> Result<Vec<MatchedRow>> {
        let total = rows.len();
        let mut matched = Vec::with_capacity(total);
        for (idx, row) in rows.iter().enumerate() {
            let parsed = upload_type.parse_row(row);
            matched.push(self.match_one(partner_id, parsed).await?);

            let current = idx + 1;
            if current % 500 == 0 {
                tracing::info!("匹配进度: {}/{}", current, total);
            }
        }
        Ok(matched)
    }

    async fn match_one(
        &self,
        partner_id: Option<i64>,
        parsed: SettlementRow,
    ) -> Result<MatchedRow> {
        // 无法解析运单号: 计入 total_records, 不入任一桶
        let Some(tracking) = parsed.tracking_number.clone() else {
            return Ok(Self::not_found_row(parsed));
        };

        let shipment = self
            .store
            .find_shipment_by_tracking(partner_id, &tracking)
            .await?;

        let Some(shipment) = shipment else {
            return Ok(Self::not_found_row(parsed));
        };

        // 精确相等判定, 无容差窗口
        let status = if parsed.cod_amount == shipment.cod_amount
            && parsed.shipping_fee == shipment.shipping_fee
        {
            RowStatus::Matched
        } else {
            RowStatus::Mismatched
        };
        let difference = (&parsed.cod_amount - &shipment.cod_amount)
            + (&parsed.shipping_fee - &shipment.shipping_fee);

        Ok(MatchedRow {
            item: NewUploadItem {
                tracking_number: Some(tracking),
                reconciliation_status: status,
                cod_amount_file: parsed.cod_amount,
                cod_amount_system: shipment.cod_amount.clone(),
                shipping_fee_file: parsed.shipping_fee,
                shipping_fee_system: shipment.shipping_fee.clone(),
                difference_amount: difference,
            },
            shipment: Some(shipment),
            commission: parsed.commission,
        })
    }

    /// 台账未命中 (或运单号缺失): 系统侧按零计, 文件侧全额即差额
    fn not_found_row(parsed: SettlementRow) -> MatchedRow {
        let difference = &parsed.cod_amount + &parsed.shipping_fee;
        MatchedRow {
            item: NewUploadItem {
                tracking_number: parsed.tracking_number,
                reconciliation_status: RowStatus::NotFound,
                cod_amount_file: parsed.cod_amount,
                cod_amount_system: BigDecimal::zero(),
                shipping_fee_file: parsed.shipping_fee,
                shipping_fee_system: BigDecimal::zero(),
                difference_amount: difference,
            },
            shipment: None,
            commission: parsed.commission,
        }
    }
}
