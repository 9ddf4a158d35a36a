use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StockUnit;

/// 秒杀下单请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillAdmissionRequest {
    pub member_id: i64,
    pub seckill_product_id: i64,
    pub quantity: i32,
}

/// 拼团下单请求
/// group_no 为空表示开新团，否则加入已有团
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBuyJoinRequest {
    pub member_id: i64,
    pub group_buy_id: i64,
    pub group_no: Option<String>,
    pub quantity: i32,
}

/// 库存预留结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub unit: StockUnit,
    /// 预留后的已售数量
    pub sold_quantity: i32,
    pub quantity: i32,
}

impl Reservation {
    pub fn is_exhausted(&self) -> bool {
        self.sold_quantity >= self.quantity
    }
}

/// 秒杀准入成功后的订单引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillAdmission {
    pub order_id: i64,
    pub seckill_order_id: i64,
    pub session_id: i64,
    pub reservation: Reservation,
    /// 下单时锁定的单价(分)
    pub unit_price: i64,
    pub total_amount: i64,
    /// 本次下单使场次售罄
    pub session_sold_out: bool,
}

/// 拼团准入成功后的订单引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBuyAdmission {
    pub order_id: i64,
    pub group_buy_order_id: i64,
    pub group_no: String,
    pub is_leader: bool,
    pub expire_time: DateTime<Utc>,
    pub reservation: Reservation,
    pub unit_price: i64,
    pub total_amount: i64,
    pub sold_out: bool,
}

/// 补偿释放的库存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedStock {
    pub unit: StockUnit,
    pub released: i32,
    pub sold_quantity: i32,
    pub quantity: i32,
    /// 释放后从 sold_out 恢复为 active
    pub reopened: bool,
}
