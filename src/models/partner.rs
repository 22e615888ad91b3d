use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// 合作方类型: 快递承运商 (carrier) 或 电商平台 (platform)
///
/// 同时作为上传文件类型的判别标签: 列名映射与净额口径按变体分发,
/// 新增合作方格式只需新增变体分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "partner_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartnerType {
    Carrier,
    Platform,
}

impl PartnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerType::Carrier => "carrier",
            PartnerType::Platform => "platform",
        }
    }

    /// 对账单编号前缀
    pub fn code_prefix(&self) -> &'static str {
        match self {
            PartnerType::Carrier => "CR",
            PartnerType::Platform => "PT",
        }
    }
}

impl fmt::Display for PartnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 合作方 (承运商/平台), 由合作方管理模块维护, 本引擎只读
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Partner {
    pub id: i64,
    pub name: String,
    pub partner_type: PartnerType,
}
