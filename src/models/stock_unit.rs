use serde::{Deserialize, Serialize};

/// 库存单元：拥有独立、有上限库存计数的最小实体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StockUnit {
    /// seckill_products.id
    SeckillProduct(i64),
    /// group_buys.id
    GroupBuy(i64),
}

impl std::fmt::Display for StockUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockUnit::SeckillProduct(id) => write!(f, "seckill_product:{id}"),
            StockUnit::GroupBuy(id) => write!(f, "group_buy:{id}"),
        }
    }
}

/// 受状态机管理的活动实体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CampaignRef {
    Activity(i64),
    Session(i64),
    GroupBuy(i64),
}

impl std::fmt::Display for CampaignRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignRef::Activity(id) => write!(f, "activity:{id}"),
            CampaignRef::Session(id) => write!(f, "session:{id}"),
            CampaignRef::GroupBuy(id) => write!(f, "group_buy:{id}"),
        }
    }
}

/// 库存单元当前计数（权威值的一次读取）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub unit: StockUnit,
    pub product_id: i64,
    pub sku_id: i64,
    pub quantity: i32,
    pub sold_quantity: i32,
}

impl StockSnapshot {
    pub fn remaining(&self) -> i32 {
        (self.quantity - self.sold_quantity).max(0)
    }
}
