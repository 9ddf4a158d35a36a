//! 活动仓储
//!
//! 所有写操作都是一个完整的原子单元（一个数据库事务，或一次内存锁内的
//! 操作），调用方拿不到原始行，也无法把"限购校验"和"扣减库存"拆成两次
//! 独立提交。状态写入都是条件更新，重复执行返回 `false` / `None` 而不是报错。

pub mod memory;
pub mod postgres;

pub use memory::MemoryPromotionRepository;
pub use postgres::PgPromotionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    CampaignStatus, activity_entity, group_buy_entity, group_buy_order_entity,
    seckill_order_entity, seckill_product_entity, seckill_session_entity,
};
use crate::error::{AppError, AppResult};
use crate::models::*;

#[async_trait]
pub trait PromotionRepository: Send + Sync {
    // ---------- 管理端创建 ----------

    async fn create_activity(
        &self,
        new: &NewActivity,
        now: DateTime<Utc>,
    ) -> AppResult<activity_entity::Model>;

    async fn create_session(
        &self,
        new: &NewSession,
        now: DateTime<Utc>,
    ) -> AppResult<seckill_session_entity::Model>;

    /// (session, sku) 重复时返回 ValidationError；同时累加场次 total_quantity
    async fn create_seckill_product(
        &self,
        new: &NewSeckillProduct,
        original_price: i64,
        now: DateTime<Utc>,
    ) -> AppResult<seckill_product_entity::Model>;

    async fn create_group_buy(
        &self,
        new: &NewGroupBuy,
        original_price: i64,
        now: DateTime<Utc>,
    ) -> AppResult<group_buy_entity::Model>;

    // ---------- 读取 ----------

    async fn find_activity(&self, id: i64) -> AppResult<Option<activity_entity::Model>>;

    async fn find_session(&self, id: i64) -> AppResult<Option<seckill_session_entity::Model>>;

    async fn find_seckill_product(
        &self,
        id: i64,
    ) -> AppResult<Option<seckill_product_entity::Model>>;

    async fn find_group_buy(&self, id: i64) -> AppResult<Option<group_buy_entity::Model>>;

    async fn find_seckill_order(&self, id: i64)
    -> AppResult<Option<seckill_order_entity::Model>>;

    async fn find_group_buy_order(
        &self,
        id: i64,
    ) -> AppResult<Option<group_buy_order_entity::Model>>;

    async fn list_group_members(
        &self,
        group_no: &str,
    ) -> AppResult<Vec<group_buy_order_entity::Model>>;

    /// 某商品关联的全部活动库存单元（缓存重建用）
    async fn list_stock_units_for_product(&self, product_id: i64)
    -> AppResult<Vec<StockSnapshot>>;

    async fn campaign_status(&self, campaign: CampaignRef) -> AppResult<Option<CampaignStatus>>;

    // ---------- 状态机 ----------

    /// 条件迁移：仅当当前状态属于 `from` 时写入 `to`，返回是否写入
    async fn transition_status(
        &self,
        campaign: CampaignRef,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// 管理端开关；实体不存在返回 false
    async fn set_enabled(
        &self,
        campaign: CampaignRef,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// 到点需要开始 / 结束的实体
    async fn sweep_candidates(&self, now: DateTime<Utc>) -> AppResult<SweepCandidates>;

    // ---------- 库存账本 ----------

    /// 原子条件扣减：sold + qty <= quantity 才提交
    async fn reserve_stock(
        &self,
        unit: StockUnit,
        qty: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation>;

    /// 补偿释放；sold 不会降到 0 以下
    async fn release_stock(
        &self,
        unit: StockUnit,
        qty: i32,
        now: DateTime<Utc>,
    ) -> AppResult<ReleasedStock>;

    /// 管理员修正分配库存，不得低于已售
    async fn adjust_quantity(
        &self,
        unit: StockUnit,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> AppResult<StockSnapshot>;

    // ---------- 准入 ----------

    /// 状态校验 + 限购 + 扣库存 + 写订单，一个原子单元
    async fn admit_seckill(
        &self,
        req: &SeckillAdmissionRequest,
        now: DateTime<Utc>,
    ) -> AppResult<SeckillAdmission>;

    /// 同上；开新团时使用 `new_group_no`
    async fn admit_group_buy(
        &self,
        req: &GroupBuyJoinRequest,
        new_group_no: &str,
        now: DateTime<Utc>,
    ) -> AppResult<GroupBuyAdmission>;

    // ---------- 秒杀订单 ----------

    /// pending -> paid，返回是否写入
    async fn mark_seckill_paid(&self, seckill_order_id: i64, now: DateTime<Utc>)
    -> AppResult<bool>;

    /// pending -> cancelled 并释放库存；已不是 pending 时返回 None
    async fn cancel_seckill_order(
        &self,
        seckill_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<ReleasedStock>>;

    async fn list_unpaid_seckill_orders(&self, created_before: DateTime<Utc>)
    -> AppResult<Vec<i64>>;

    // ---------- 拼团 ----------

    async fn mark_group_order_paid(
        &self,
        group_buy_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<GroupPaymentMark>;

    /// 已支付人数达到 min_people 时整团 -> grouped，success_group_count + 1；
    /// 对同一个团只会成功一次
    async fn promote_group(&self, group_no: &str, now: DateTime<Utc>)
    -> AppResult<GroupPromotion>;

    async fn list_expired_groups(&self, now: DateTime<Utc>) -> AppResult<Vec<String>>;

    /// 过期未成团 -> failed 并释放库存；已处理过返回 None
    async fn fail_group(&self, group_no: &str, now: DateTime<Utc>)
    -> AppResult<Option<FailedGroup>>;
}

/// 准入时的持久化状态校验（不使用展示用的推导状态）
pub(crate) fn ensure_purchasable(
    what: &str,
    status: CampaignStatus,
    is_enabled: bool,
) -> AppResult<()> {
    if !is_enabled {
        return Err(AppError::CampaignNotPurchasable(format!("{what} is disabled")));
    }
    if status != CampaignStatus::Active {
        return Err(AppError::CampaignNotPurchasable(format!("{what} is {status}")));
    }
    Ok(())
}

pub(crate) fn ensure_positive_quantity(qty: i32) -> AppResult<()> {
    if qty <= 0 {
        return Err(AppError::ValidationError(
            "Quantity must be positive".to_string(),
        ));
    }
    Ok(())
}

/// 预留判定：返回预留后的 sold
pub(crate) fn try_reserve(unit: StockUnit, sold: i32, quantity: i32, qty: i32) -> AppResult<i32> {
    if sold as i64 + qty as i64 > quantity as i64 {
        return Err(AppError::InsufficientStock {
            unit,
            remaining: (quantity - sold).max(0),
            requested: qty,
        });
    }
    Ok(sold + qty)
}

/// 预留后是否触发售罄
pub(crate) fn exhausted_status(status: CampaignStatus, sold: i32, total: i32) -> Option<CampaignStatus> {
    if total > 0 && sold >= total {
        status.exhaust().ok()
    } else {
        None
    }
}

/// 释放后 sold_out 的实体恢复为 active
pub(crate) fn reopened_status(status: CampaignStatus, sold: i32, total: i32) -> Option<CampaignStatus> {
    if status == CampaignStatus::SoldOut && sold < total {
        Some(CampaignStatus::Active)
    } else {
        None
    }
}

/// 从未终结的实体中挑出到点需要推进的
///
/// - 场次 / 拼团: pending 且启用且 start <= now <= end 时开始；过了 end 一律结束
/// - 活动: 任一启用场次处于时间窗内时开始；全部场次都过了 end 时结束
pub(crate) fn sweep_candidates_from<'a>(
    activities: impl IntoIterator<Item = &'a activity_entity::Model>,
    sessions: impl IntoIterator<Item = &'a seckill_session_entity::Model>,
    group_buys: impl IntoIterator<Item = &'a group_buy_entity::Model>,
    now: DateTime<Utc>,
) -> SweepCandidates {
    let in_window = |start: DateTime<Utc>, end: DateTime<Utc>| start <= now && now <= end;
    let sessions: Vec<&seckill_session_entity::Model> = sessions.into_iter().collect();
    let mut out = SweepCandidates::default();

    for s in &sessions {
        if s.status == CampaignStatus::Pending && s.is_enabled && in_window(s.start_time, s.end_time) {
            out.to_start.push(CampaignRef::Session(s.id));
        } else if !s.status.is_terminal() && now > s.end_time {
            out.to_end.push(CampaignRef::Session(s.id));
        }
    }

    for a in activities {
        if a.status.is_terminal() {
            continue;
        }
        let mut owned = sessions.iter().filter(|s| s.activity_id == a.id).peekable();
        if owned.peek().is_none() {
            continue;
        }
        let (mut any_live, mut all_past) = (false, true);
        for s in owned {
            any_live |= s.is_enabled && in_window(s.start_time, s.end_time);
            all_past &= now > s.end_time;
        }
        if a.status == CampaignStatus::Pending && a.is_enabled && any_live {
            out.to_start.push(CampaignRef::Activity(a.id));
        } else if all_past {
            out.to_end.push(CampaignRef::Activity(a.id));
        }
    }

    for g in group_buys {
        if g.status == CampaignStatus::Pending && g.is_enabled && in_window(g.start_time, g.end_time) {
            out.to_start.push(CampaignRef::GroupBuy(g.id));
        } else if !g.status.is_terminal() && now > g.end_time {
            out.to_end.push(CampaignRef::GroupBuy(g.id));
        }
    }
    out
}

/// 加入已有团的校验，返回团的过期时间
pub(crate) fn check_joinable(
    group_buy: &group_buy_entity::Model,
    group_no: &str,
    members: &[group_buy_order_entity::Model],
    member_id: i64,
    now: DateTime<Utc>,
) -> AppResult<DateTime<Utc>> {
    let leader = members
        .iter()
        .find(|m| m.is_leader)
        .or_else(|| members.first())
        .filter(|m| m.group_buy_id == group_buy.id)
        .ok_or_else(|| AppError::GroupUnavailable(format!("group {group_no} does not exist")))?;
    if members.iter().any(|m| !m.status.is_open()) {
        return Err(AppError::GroupUnavailable(format!(
            "group {group_no} is already resolved"
        )));
    }
    if leader.expire_time <= now {
        return Err(AppError::GroupUnavailable(format!("group {group_no} has expired")));
    }
    if group_buy.max_people > 0 && members.len() as i32 >= group_buy.max_people {
        return Err(AppError::GroupUnavailable(format!("group {group_no} is full")));
    }
    if members.iter().any(|m| m.member_id == member_id) {
        return Err(AppError::ValidationError(format!(
            "member {member_id} already joined group {group_no}"
        )));
    }
    Ok(leader.expire_time)
}
