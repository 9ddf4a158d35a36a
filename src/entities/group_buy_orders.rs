use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum GroupBuyOrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "grouped")]
    Grouped,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl GroupBuyOrderStatus {
    /// 团仍未结算 (还可能成团或失败)
    pub fn is_open(self) -> bool {
        matches!(self, GroupBuyOrderStatus::Pending | GroupBuyOrderStatus::Paid)
    }
}

impl std::fmt::Display for GroupBuyOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupBuyOrderStatus::Pending => write!(f, "pending"),
            GroupBuyOrderStatus::Paid => write!(f, "paid"),
            GroupBuyOrderStatus::Grouped => write!(f, "grouped"),
            GroupBuyOrderStatus::Failed => write!(f, "failed"),
            GroupBuyOrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 拼团参与记录；同一 group_no 的记录组成一个团
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "group_buy_orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_no: String,
    pub group_buy_id: i64,
    pub order_id: i64,
    pub member_id: i64,
    pub quantity: i32,
    /// 拼团价快照(分)
    pub group_price: i64,
    pub is_leader: bool,
    pub status: GroupBuyOrderStatus,
    pub expire_time: DateTime<Utc>,
    pub group_time: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// 计入限购 / 占用库存的记录
    pub fn holds_stock(&self) -> bool {
        !matches!(
            self.status,
            GroupBuyOrderStatus::Failed | GroupBuyOrderStatus::Cancelled
        )
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
