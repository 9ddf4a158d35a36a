use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum SeckillOrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl std::fmt::Display for SeckillOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeckillOrderStatus::Pending => write!(f, "pending"),
            SeckillOrderStatus::Paid => write!(f, "paid"),
            SeckillOrderStatus::Cancelled => write!(f, "cancelled"),
            SeckillOrderStatus::Completed => write!(f, "completed"),
        }
    }
}

/// 秒杀订单（每次成功准入恰好创建一条）
/// original_price / seckill_price 为下单时的价格快照，创建后不可变
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "seckill_orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub order_id: i64,
    pub session_id: i64,
    pub seckill_product_id: i64,
    pub member_id: i64,
    pub quantity: i32,
    pub original_price: i64,
    pub seckill_price: i64,
    pub status: SeckillOrderStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// 计入限购的订单（未取消）
    pub fn counts_toward_limit(&self) -> bool {
        self.status != SeckillOrderStatus::Cancelled
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
