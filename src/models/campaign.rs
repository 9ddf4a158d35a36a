use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CampaignRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    pub title: String,
    pub rules: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub activity_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_quantity_per_user: i32,
}

/// 创建秒杀商品; original_price 为空时取 SKU 当前价格
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSeckillProduct {
    pub session_id: i64,
    pub product_id: i64,
    pub product_sku_id: i64,
    pub original_price: Option<i64>,
    pub seckill_price: i64,
    pub quantity: i32,
    pub max_quantity_per_user: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroupBuy {
    pub title: String,
    pub product_id: i64,
    pub sku_id: i64,
    pub original_price: Option<i64>,
    pub group_price: i64,
    pub min_people: i32,
    pub max_people: i32,
    pub max_quantity_per_user: i32,
    pub expire_hours: i32,
    pub total_quantity: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// 定时任务待推进的实体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepCandidates {
    pub to_start: Vec<CampaignRef>,
    pub to_end: Vec<CampaignRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub started: usize,
    pub ended: usize,
    /// 已被其他 worker 推进，本次为 no-op
    pub skipped: usize,
}

impl SweepReport {
    pub fn changed(&self) -> usize {
        self.started + self.ended
    }
}

/// 拼团过期 / 支付超时扫描结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSweepReport {
    pub resolved: usize,
    pub released_quantity: i64,
    pub refunds_requested: usize,
}
