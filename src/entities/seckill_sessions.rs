use super::CampaignStatus;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 秒杀场次
/// - total_quantity: 场次内所有秒杀商品 quantity 之和
/// - sold_quantity: 各商品 sold_quantity 的冗余汇总, 始终 <= total_quantity
/// - max_quantity_per_user: 单个买家在本场次的限购数量 (0 = 不限)
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "seckill_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub activity_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: CampaignStatus,
    pub max_quantity_per_user: i32,
    pub total_quantity: i32,
    pub sold_quantity: i32,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn remaining(&self) -> i32 {
        (self.total_quantity - self.sold_quantity).max(0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
