use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 秒杀商品（库存单元）
/// 同一场次内 (session_id, product_sku_id) 唯一
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "seckill_products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub product_id: i64,
    pub product_sku_id: i64,
    /// 原价(分)
    pub original_price: i64,
    /// 秒杀价(分)
    pub seckill_price: i64,
    /// 分配库存
    pub quantity: i32,
    /// 已售 (<= quantity)
    pub sold_quantity: i32,
    /// 单品限购 (0 = 不限)
    pub max_quantity_per_user: i32,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn remaining(&self) -> i32 {
        (self.quantity - self.sold_quantity).max(0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
