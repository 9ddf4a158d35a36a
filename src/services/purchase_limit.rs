//! 限购校验
//!
//! 这里只做判定；"读取已购数量 -> 判定 -> 写入订单" 必须由仓储在同一个
//! 原子单元内完成（见 `PromotionRepository::admit_seckill`），
//! 否则同一买家的并发请求可能同时通过校验。

use crate::entities::{group_buy_order_entity, seckill_order_entity};
use crate::error::{AppError, AppResult};

/// 限购维度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// 单个秒杀商品
    SeckillProduct,
    /// 整个秒杀场次
    Session,
    /// 拼团活动
    GroupBuy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitCheck {
    pub scope: LimitScope,
    /// 0 表示不限购
    pub limit: i32,
    /// 买家在该维度已占用（未取消）的数量
    pub existing: i64,
}

pub struct PurchaseLimitGuard;

impl PurchaseLimitGuard {
    /// existing + requested > limit 时拒绝；limit == 0 不限购
    pub fn check(limit: i32, existing: i64, requested: i32) -> AppResult<()> {
        if limit <= 0 {
            return Ok(());
        }
        if existing + requested as i64 > limit as i64 {
            return Err(AppError::LimitExceeded {
                limit,
                existing,
                requested,
            });
        }
        Ok(())
    }

    /// 按顺序校验所有维度，第一个失败即返回
    pub fn check_all(checks: &[LimitCheck], requested: i32) -> AppResult<()> {
        for c in checks {
            if let Err(e) = Self::check(c.limit, c.existing, requested) {
                log::debug!("Purchase limit hit on {:?}: {e}", c.scope);
                return Err(e);
            }
        }
        Ok(())
    }

    /// 秒杀：买家在某商品与所在场次的已购数量
    pub fn seckill_existing<'a>(
        orders: impl IntoIterator<Item = &'a seckill_order_entity::Model>,
        member_id: i64,
        seckill_product_id: i64,
    ) -> (i64, i64) {
        let mut product = 0i64;
        let mut session = 0i64;
        for o in orders
            .into_iter()
            .filter(|o| o.member_id == member_id && o.counts_toward_limit())
        {
            session += o.quantity as i64;
            if o.seckill_product_id == seckill_product_id {
                product += o.quantity as i64;
            }
        }
        (product, session)
    }

    /// 拼团：买家在该拼团活动的已购数量（失败/取消的不计）
    pub fn group_buy_existing<'a>(
        orders: impl IntoIterator<Item = &'a group_buy_order_entity::Model>,
        member_id: i64,
    ) -> i64 {
        orders
            .into_iter()
            .filter(|o| o.member_id == member_id && o.holds_stock())
            .map(|o| o.quantity as i64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SeckillOrderStatus;
    use chrono::Utc;

    fn order(member_id: i64, product: i64, qty: i32, status: SeckillOrderStatus) -> seckill_order_entity::Model {
        seckill_order_entity::Model {
            id: 0,
            order_id: 0,
            session_id: 1,
            seckill_product_id: product,
            member_id,
            quantity: qty,
            original_price: 100,
            seckill_price: 50,
            status,
            paid_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn zero_limit_is_unlimited() {
        assert!(PurchaseLimitGuard::check(0, 1_000, 1_000).is_ok());
    }

    #[test]
    fn boundary_is_inclusive() {
        assert!(PurchaseLimitGuard::check(2, 1, 1).is_ok());
        assert!(matches!(
            PurchaseLimitGuard::check(2, 2, 1),
            Err(AppError::LimitExceeded { limit: 2, existing: 2, requested: 1 })
        ));
        assert!(PurchaseLimitGuard::check(2, 0, 3).is_err());
    }

    #[test]
    fn check_all_reports_first_failing_scope() {
        let checks = [
            LimitCheck { scope: LimitScope::SeckillProduct, limit: 5, existing: 0 },
            LimitCheck { scope: LimitScope::Session, limit: 3, existing: 3 },
        ];
        assert!(matches!(
            PurchaseLimitGuard::check_all(&checks, 1),
            Err(AppError::LimitExceeded { limit: 3, .. })
        ));
    }

    #[test]
    fn cancelled_orders_do_not_count() {
        let orders = vec![
            order(1, 10, 1, SeckillOrderStatus::Paid),
            order(1, 10, 2, SeckillOrderStatus::Cancelled),
            order(1, 11, 1, SeckillOrderStatus::Pending),
            order(2, 10, 4, SeckillOrderStatus::Paid),
        ];
        assert_eq!(PurchaseLimitGuard::seckill_existing(&orders, 1, 10), (1, 2));
    }
}
