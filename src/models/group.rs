use serde::{Deserialize, Serialize};

use crate::entities::GroupBuyOrderStatus;

/// 标记拼团订单已支付的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupPaymentMark {
    /// pending -> paid 成功
    Marked { group_no: String, group_buy_id: i64 },
    /// 重复的支付确认
    AlreadyPaid { group_no: String, group_buy_id: i64 },
    /// 团已结算（成团/失败/取消），迟到的支付确认
    Resolved {
        group_no: String,
        status: GroupBuyOrderStatus,
    },
}

/// 成团判定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupPromotion {
    /// 本次调用完成了成团（每个团恰好一次）
    Promoted {
        group_buy_id: i64,
        member_ids: Vec<i64>,
    },
    /// 人数未满
    Waiting { paid: i32, required: i32 },
    /// 已成团或已失败
    AlreadyResolved,
}

/// 失败团中的一条参与记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMember {
    pub group_buy_order_id: i64,
    pub order_id: i64,
    pub member_id: i64,
    pub quantity: i32,
    pub amount: i64,
    /// 已支付 -> 需要发起退款
    pub was_paid: bool,
}

/// 过期失败的团
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedGroup {
    pub group_no: String,
    pub group_buy_id: i64,
    pub members: Vec<FailedMember>,
    pub released: super::ReleasedStock,
}

/// 支付确认对外的处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupPaymentOutcome {
    Grouped { group_no: String },
    Waiting { group_no: String, paid: i32, required: i32 },
    /// 迟到的支付确认，已记录并忽略
    Ignored { group_no: String },
}
