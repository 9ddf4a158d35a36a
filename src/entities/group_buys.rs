use super::CampaignStatus;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 拼团活动定义（同时也是一个库存单元）
/// - min_people: 成团人数 (quorum)
/// - max_people: 单团人数上限
/// - expire_hours: 开团后的拼团有效期
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "group_buys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub title: String,
    pub product_id: i64,
    pub sku_id: i64,
    pub original_price: i64,
    pub group_price: i64,
    pub min_people: i32,
    pub max_people: i32,
    pub max_quantity_per_user: i32,
    pub expire_hours: i32,
    pub total_quantity: i32,
    pub sold_quantity: i32,
    pub group_count: i32,
    pub success_group_count: i32,
    pub status: CampaignStatus,
    pub is_enabled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
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
