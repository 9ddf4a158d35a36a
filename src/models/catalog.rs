use serde::{Deserialize, Serialize};

/// 商品目录中 SKU 的只读快照（仅用于展示和价格快照组装）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuSnapshot {
    pub sku_id: i64,
    pub product_id: i64,
    /// 基础价格(分)
    pub price: i64,
    /// 普通库存（非活动库存）
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: i64,
    pub name: String,
    pub image: Option<String>,
    pub skus: Vec<SkuSnapshot>,
}

/// 普通库存预警
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockWarning {
    pub product_id: i64,
    pub product_name: String,
    pub sku_id: i64,
    pub stock: i64,
    pub threshold: i64,
}

/// 退款发起请求（退款执行不在本系统范围内）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_id: i64,
    pub member_id: i64,
    pub amount: i64,
    pub reason: String,
}
