//! sea-orm / Postgres 仓储
//!
//! 锁顺序固定为：场次行 -> 秒杀商品行；拼团活动行 -> 团内订单行。
//! 扣库存一律使用条件更新 `sold + qty <= quantity`，受影响行数为 0 即库存不足。

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, IntoActiveModel, QueryFilter, QuerySelect, Set, SqlErr,
    TransactionTrait,
};

use super::{
    PromotionRepository, check_joinable, ensure_positive_quantity, ensure_purchasable,
    exhausted_status, reopened_status, sweep_candidates_from,
};
use crate::entities::{
    CampaignStatus, GroupBuyOrderStatus, OrderStatus, OrderType, SeckillOrderStatus,
    activity_entity as activities, group_buy_entity as group_buys,
    group_buy_order_entity as group_orders, order_entity as orders,
    seckill_order_entity as seckill_orders, seckill_product_entity as products,
    seckill_session_entity as sessions,
};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::services::purchase_limit::{LimitCheck, LimitScope, PurchaseLimitGuard};

const OPEN_GROUP_STATUSES: [GroupBuyOrderStatus; 2] =
    [GroupBuyOrderStatus::Pending, GroupBuyOrderStatus::Paid];
const LIVE_STATUSES: [CampaignStatus; 3] = [
    CampaignStatus::Pending,
    CampaignStatus::Active,
    CampaignStatus::SoldOut,
];

#[derive(Clone)]
pub struct PgPromotionRepository {
    pool: DatabaseConnection,
    lock_timeout: std::time::Duration,
}

impl PgPromotionRepository {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self {
            pool,
            lock_timeout: std::time::Duration::from_secs(1),
        }
    }

    /// 单条语句等待行锁的上限；超时以 PersistenceConflict 返回
    pub fn with_lock_timeout(mut self, lock_timeout: std::time::Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    async fn begin(&self) -> AppResult<DatabaseTransaction> {
        let txn = self.pool.begin().await?;
        txn.execute_unprepared(&format!(
            "SET LOCAL lock_timeout = {}",
            self.lock_timeout.as_millis().max(1)
        ))
        .await?;
        Ok(txn)
    }

    /// 唯一索引冲突（并发重复插入）转为校验错误
    fn unique_violation(err: sea_orm::DbErr, message: impl FnOnce() -> String) -> AppError {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => AppError::ValidationError(message()),
            _ => err.into(),
        }
    }
}

struct Reserved {
    reservation: Reservation,
    sold_out: bool,
}

// -----------------------------
// 事务内辅助函数
// -----------------------------

async fn lock_session(txn: &DatabaseTransaction, id: i64) -> AppResult<Option<sessions::Model>> {
    Ok(sessions::Entity::find_by_id(id)
        .lock_exclusive()
        .one(txn)
        .await?)
}

async fn lock_group_buy(
    txn: &DatabaseTransaction,
    id: i64,
) -> AppResult<Option<group_buys::Model>> {
    Ok(group_buys::Entity::find_by_id(id)
        .lock_exclusive()
        .one(txn)
        .await?)
}

async fn set_session_status(
    txn: &DatabaseTransaction,
    id: i64,
    from: CampaignStatus,
    to: CampaignStatus,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let res = sessions::Entity::update_many()
        .col_expr(sessions::Column::Status, Expr::value(to))
        .col_expr(sessions::Column::UpdatedAt, Expr::value(now))
        .filter(sessions::Column::Id.eq(id))
        .filter(sessions::Column::Status.eq(from))
        .exec(txn)
        .await?;
    Ok(res.rows_affected == 1)
}

async fn set_group_buy_status(
    txn: &DatabaseTransaction,
    id: i64,
    from: CampaignStatus,
    to: CampaignStatus,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let res = group_buys::Entity::update_many()
        .col_expr(group_buys::Column::Status, Expr::value(to))
        .col_expr(group_buys::Column::UpdatedAt, Expr::value(now))
        .filter(group_buys::Column::Id.eq(id))
        .filter(group_buys::Column::Status.eq(from))
        .exec(txn)
        .await?;
    Ok(res.rows_affected == 1)
}

async fn reserve_in(
    txn: &DatabaseTransaction,
    unit: StockUnit,
    qty: i32,
    now: DateTime<Utc>,
) -> AppResult<Reserved> {
    ensure_positive_quantity(qty)?;
    match unit {
        StockUnit::SeckillProduct(id) => {
            let product = products::Entity::find_by_id(id)
                .one(txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
            lock_session(txn, product.session_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("session {}", product.session_id)))?;

            let res = products::Entity::update_many()
                .col_expr(
                    products::Column::SoldQuantity,
                    Expr::col(products::Column::SoldQuantity).add(qty),
                )
                .col_expr(products::Column::UpdatedAt, Expr::value(now))
                .filter(products::Column::Id.eq(id))
                .filter(
                    Expr::col(products::Column::SoldQuantity)
                        .lte(Expr::col(products::Column::Quantity).sub(qty)),
                )
                .exec(txn)
                .await?;
            let product = products::Entity::find_by_id(id)
                .one(txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
            if res.rows_affected == 0 {
                return Err(AppError::InsufficientStock {
                    unit,
                    remaining: product.remaining(),
                    requested: qty,
                });
            }

            sessions::Entity::update_many()
                .col_expr(
                    sessions::Column::SoldQuantity,
                    Expr::col(sessions::Column::SoldQuantity).add(qty),
                )
                .col_expr(sessions::Column::UpdatedAt, Expr::value(now))
                .filter(sessions::Column::Id.eq(product.session_id))
                .exec(txn)
                .await?;
            let session = sessions::Entity::find_by_id(product.session_id)
                .one(txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("session {}", product.session_id)))?;
            let mut sold_out = false;
            if let Some(next) =
                exhausted_status(session.status, session.sold_quantity, session.total_quantity)
            {
                sold_out = set_session_status(txn, session.id, session.status, next, now).await?;
            }

            Ok(Reserved {
                reservation: Reservation {
                    unit,
                    sold_quantity: product.sold_quantity,
                    quantity: product.quantity,
                },
                sold_out,
            })
        }
        StockUnit::GroupBuy(id) => {
            lock_group_buy(txn, id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
            let res = group_buys::Entity::update_many()
                .col_expr(
                    group_buys::Column::SoldQuantity,
                    Expr::col(group_buys::Column::SoldQuantity).add(qty),
                )
                .col_expr(group_buys::Column::UpdatedAt, Expr::value(now))
                .filter(group_buys::Column::Id.eq(id))
                .filter(
                    Expr::col(group_buys::Column::SoldQuantity)
                        .lte(Expr::col(group_buys::Column::TotalQuantity).sub(qty)),
                )
                .exec(txn)
                .await?;
            let gb = group_buys::Entity::find_by_id(id)
                .one(txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
            if res.rows_affected == 0 {
                return Err(AppError::InsufficientStock {
                    unit,
                    remaining: gb.remaining(),
                    requested: qty,
                });
            }

            let mut sold_out = false;
            if let Some(next) = exhausted_status(gb.status, gb.sold_quantity, gb.total_quantity) {
                sold_out = set_group_buy_status(txn, gb.id, gb.status, next, now).await?;
            }
            Ok(Reserved {
                reservation: Reservation {
                    unit,
                    sold_quantity: gb.sold_quantity,
                    quantity: gb.total_quantity,
                },
                sold_out,
            })
        }
    }
}

async fn release_in(
    txn: &DatabaseTransaction,
    unit: StockUnit,
    qty: i32,
    now: DateTime<Utc>,
) -> AppResult<ReleasedStock> {
    ensure_positive_quantity(qty)?;
    match unit {
        StockUnit::SeckillProduct(id) => {
            let product = products::Entity::find_by_id(id)
                .one(txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
            let session = lock_session(txn, product.session_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("session {}", product.session_id)))?;
            let product = products::Entity::find_by_id(id)
                .lock_exclusive()
                .one(txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;

            let released = qty.min(product.sold_quantity);
            let sold = product.sold_quantity - released;
            let session_sold = (session.sold_quantity - released).max(0);

            let mut am = product.clone().into_active_model();
            am.sold_quantity = Set(sold);
            am.updated_at = Set(now);
            am.update(txn).await?;

            let reopen = reopened_status(session.status, session_sold, session.total_quantity)
                .filter(|_| now < session.end_time);
            let mut am = session.into_active_model();
            am.sold_quantity = Set(session_sold);
            if let Some(next) = reopen {
                am.status = Set(next);
            }
            am.updated_at = Set(now);
            am.update(txn).await?;

            Ok(ReleasedStock {
                unit,
                released,
                sold_quantity: sold,
                quantity: product.quantity,
                reopened: reopen.is_some(),
            })
        }
        StockUnit::GroupBuy(id) => {
            let gb = lock_group_buy(txn, id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
            let released = qty.min(gb.sold_quantity);
            let sold = gb.sold_quantity - released;
            let reopen = reopened_status(gb.status, sold, gb.total_quantity)
                .filter(|_| now < gb.end_time);
            let quantity = gb.total_quantity;

            let mut am = gb.into_active_model();
            am.sold_quantity = Set(sold);
            if let Some(next) = reopen {
                am.status = Set(next);
            }
            am.updated_at = Set(now);
            am.update(txn).await?;

            Ok(ReleasedStock {
                unit,
                released,
                sold_quantity: sold,
                quantity,
                reopened: reopen.is_some(),
            })
        }
    }
}

async fn insert_order(
    txn: &DatabaseTransaction,
    member_id: i64,
    order_type: OrderType,
    total_amount: i64,
    now: DateTime<Utc>,
) -> AppResult<i64> {
    let order = orders::ActiveModel {
        member_id: Set(member_id),
        order_type: Set(order_type),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await?;
    Ok(order.id)
}

async fn set_orders_status(
    txn: &DatabaseTransaction,
    order_ids: Vec<i64>,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if order_ids.is_empty() {
        return Ok(());
    }
    orders::Entity::update_many()
        .col_expr(orders::Column::Status, Expr::value(status))
        .col_expr(orders::Column::UpdatedAt, Expr::value(now))
        .filter(orders::Column::Id.is_in(order_ids))
        .exec(txn)
        .await?;
    Ok(())
}

async fn group_members(
    txn: &DatabaseTransaction,
    group_no: &str,
) -> AppResult<Vec<group_orders::Model>> {
    Ok(group_orders::Entity::find()
        .filter(group_orders::Column::GroupNo.eq(group_no))
        .all(txn)
        .await?)
}

fn snapshot_of_product(p: &products::Model) -> StockSnapshot {
    StockSnapshot {
        unit: StockUnit::SeckillProduct(p.id),
        product_id: p.product_id,
        sku_id: p.product_sku_id,
        quantity: p.quantity,
        sold_quantity: p.sold_quantity,
    }
}

fn snapshot_of_group_buy(g: &group_buys::Model) -> StockSnapshot {
    StockSnapshot {
        unit: StockUnit::GroupBuy(g.id),
        product_id: g.product_id,
        sku_id: g.sku_id,
        quantity: g.total_quantity,
        sold_quantity: g.sold_quantity,
    }
}

#[async_trait]
impl PromotionRepository for PgPromotionRepository {
    async fn create_activity(
        &self,
        new: &NewActivity,
        now: DateTime<Utc>,
    ) -> AppResult<activities::Model> {
        let model = activities::ActiveModel {
            title: Set(new.title.clone()),
            status: Set(CampaignStatus::Pending),
            is_enabled: Set(true),
            rules: Set(new.rules.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;
        Ok(model)
    }

    async fn create_session(
        &self,
        new: &NewSession,
        now: DateTime<Utc>,
    ) -> AppResult<sessions::Model> {
        if activities::Entity::find_by_id(new.activity_id)
            .one(&self.pool)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!("activity {}", new.activity_id)));
        }
        let model = sessions::ActiveModel {
            activity_id: Set(new.activity_id),
            start_time: Set(new.start_time),
            end_time: Set(new.end_time),
            status: Set(CampaignStatus::Pending),
            max_quantity_per_user: Set(new.max_quantity_per_user),
            total_quantity: Set(0),
            sold_quantity: Set(0),
            is_enabled: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;
        Ok(model)
    }

    async fn create_seckill_product(
        &self,
        new: &NewSeckillProduct,
        original_price: i64,
        now: DateTime<Utc>,
    ) -> AppResult<products::Model> {
        let txn = self.begin().await?;
        let session = lock_session(&txn, new.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", new.session_id)))?;

        let already_on_sale = || {
            format!(
                "SKU {} is already on sale in session {}",
                new.product_sku_id, new.session_id
            )
        };
        let duplicate = products::Entity::find()
            .filter(products::Column::SessionId.eq(new.session_id))
            .filter(products::Column::ProductSkuId.eq(new.product_sku_id))
            .one(&txn)
            .await?;
        if duplicate.is_some() {
            return Err(AppError::ValidationError(already_on_sale()));
        }

        let model = products::ActiveModel {
            session_id: Set(new.session_id),
            product_id: Set(new.product_id),
            product_sku_id: Set(new.product_sku_id),
            original_price: Set(original_price),
            seckill_price: Set(new.seckill_price),
            quantity: Set(new.quantity),
            sold_quantity: Set(0),
            max_quantity_per_user: Set(new.max_quantity_per_user),
            is_enabled: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| Self::unique_violation(e, already_on_sale))?;

        let total = session.total_quantity + new.quantity;
        let reopen = reopened_status(session.status, session.sold_quantity, total)
            .filter(|_| now < session.end_time);
        let mut am = session.into_active_model();
        am.total_quantity = Set(total);
        if let Some(next) = reopen {
            am.status = Set(next);
        }
        am.updated_at = Set(now);
        am.update(&txn).await?;

        txn.commit().await?;
        Ok(model)
    }

    async fn create_group_buy(
        &self,
        new: &NewGroupBuy,
        original_price: i64,
        now: DateTime<Utc>,
    ) -> AppResult<group_buys::Model> {
        let model = group_buys::ActiveModel {
            title: Set(new.title.clone()),
            product_id: Set(new.product_id),
            sku_id: Set(new.sku_id),
            original_price: Set(original_price),
            group_price: Set(new.group_price),
            min_people: Set(new.min_people),
            max_people: Set(new.max_people),
            max_quantity_per_user: Set(new.max_quantity_per_user),
            expire_hours: Set(new.expire_hours),
            total_quantity: Set(new.total_quantity),
            sold_quantity: Set(0),
            group_count: Set(0),
            success_group_count: Set(0),
            status: Set(CampaignStatus::Pending),
            is_enabled: Set(true),
            start_time: Set(new.start_time),
            end_time: Set(new.end_time),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.pool)
        .await?;
        Ok(model)
    }

    async fn find_activity(&self, id: i64) -> AppResult<Option<activities::Model>> {
        Ok(activities::Entity::find_by_id(id).one(&self.pool).await?)
    }

    async fn find_session(&self, id: i64) -> AppResult<Option<sessions::Model>> {
        Ok(sessions::Entity::find_by_id(id).one(&self.pool).await?)
    }

    async fn find_seckill_product(&self, id: i64) -> AppResult<Option<products::Model>> {
        Ok(products::Entity::find_by_id(id).one(&self.pool).await?)
    }

    async fn find_group_buy(&self, id: i64) -> AppResult<Option<group_buys::Model>> {
        Ok(group_buys::Entity::find_by_id(id).one(&self.pool).await?)
    }

    async fn find_seckill_order(&self, id: i64) -> AppResult<Option<seckill_orders::Model>> {
        Ok(seckill_orders::Entity::find_by_id(id)
            .one(&self.pool)
            .await?)
    }

    async fn find_group_buy_order(&self, id: i64) -> AppResult<Option<group_orders::Model>> {
        Ok(group_orders::Entity::find_by_id(id).one(&self.pool).await?)
    }

    async fn list_group_members(&self, group_no: &str) -> AppResult<Vec<group_orders::Model>> {
        Ok(group_orders::Entity::find()
            .filter(group_orders::Column::GroupNo.eq(group_no))
            .all(&self.pool)
            .await?)
    }

    async fn list_stock_units_for_product(
        &self,
        product_id: i64,
    ) -> AppResult<Vec<StockSnapshot>> {
        let seckill = products::Entity::find()
            .filter(products::Column::ProductId.eq(product_id))
            .all(&self.pool)
            .await?;
        let group = group_buys::Entity::find()
            .filter(group_buys::Column::ProductId.eq(product_id))
            .all(&self.pool)
            .await?;
        Ok(seckill
            .iter()
            .map(snapshot_of_product)
            .chain(group.iter().map(snapshot_of_group_buy))
            .collect())
    }

    async fn campaign_status(&self, campaign: CampaignRef) -> AppResult<Option<CampaignStatus>> {
        let status = match campaign {
            CampaignRef::Activity(id) => activities::Entity::find_by_id(id)
                .one(&self.pool)
                .await?
                .map(|a| a.status),
            CampaignRef::Session(id) => sessions::Entity::find_by_id(id)
                .one(&self.pool)
                .await?
                .map(|s| s.status),
            CampaignRef::GroupBuy(id) => group_buys::Entity::find_by_id(id)
                .one(&self.pool)
                .await?
                .map(|g| g.status),
        };
        Ok(status)
    }

    async fn transition_status(
        &self,
        campaign: CampaignRef,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let from = from.to_vec();
        let rows = match campaign {
            CampaignRef::Activity(id) => {
                activities::Entity::update_many()
                    .col_expr(activities::Column::Status, Expr::value(to))
                    .col_expr(activities::Column::UpdatedAt, Expr::value(now))
                    .filter(activities::Column::Id.eq(id))
                    .filter(activities::Column::Status.is_in(from))
                    .exec(&self.pool)
                    .await?
                    .rows_affected
            }
            CampaignRef::Session(id) => {
                sessions::Entity::update_many()
                    .col_expr(sessions::Column::Status, Expr::value(to))
                    .col_expr(sessions::Column::UpdatedAt, Expr::value(now))
                    .filter(sessions::Column::Id.eq(id))
                    .filter(sessions::Column::Status.is_in(from))
                    .exec(&self.pool)
                    .await?
                    .rows_affected
            }
            CampaignRef::GroupBuy(id) => {
                group_buys::Entity::update_many()
                    .col_expr(group_buys::Column::Status, Expr::value(to))
                    .col_expr(group_buys::Column::UpdatedAt, Expr::value(now))
                    .filter(group_buys::Column::Id.eq(id))
                    .filter(group_buys::Column::Status.is_in(from))
                    .exec(&self.pool)
                    .await?
                    .rows_affected
            }
        };
        if rows == 1 {
            return Ok(true);
        }
        // 区分"条件不满足"与"不存在"
        match self.campaign_status(campaign).await? {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!("{campaign}"))),
        }
    }

    async fn set_enabled(
        &self,
        campaign: CampaignRef,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let rows = match campaign {
            CampaignRef::Activity(id) => {
                activities::Entity::update_many()
                    .col_expr(activities::Column::IsEnabled, Expr::value(enabled))
                    .col_expr(activities::Column::UpdatedAt, Expr::value(now))
                    .filter(activities::Column::Id.eq(id))
                    .exec(&self.pool)
                    .await?
                    .rows_affected
            }
            CampaignRef::Session(id) => {
                sessions::Entity::update_many()
                    .col_expr(sessions::Column::IsEnabled, Expr::value(enabled))
                    .col_expr(sessions::Column::UpdatedAt, Expr::value(now))
                    .filter(sessions::Column::Id.eq(id))
                    .exec(&self.pool)
                    .await?
                    .rows_affected
            }
            CampaignRef::GroupBuy(id) => {
                group_buys::Entity::update_many()
                    .col_expr(group_buys::Column::IsEnabled, Expr::value(enabled))
                    .col_expr(group_buys::Column::UpdatedAt, Expr::value(now))
                    .filter(group_buys::Column::Id.eq(id))
                    .exec(&self.pool)
                    .await?
                    .rows_affected
            }
        };
        Ok(rows > 0)
    }

    async fn sweep_candidates(&self, now: DateTime<Utc>) -> AppResult<SweepCandidates> {
        let live_activities = activities::Entity::find()
            .filter(activities::Column::Status.is_in(LIVE_STATUSES))
            .all(&self.pool)
            .await?;
        let activity_ids: Vec<i64> = live_activities.iter().map(|a| a.id).collect();
        // 未终结的场次 + 未终结活动下的全部场次（判断"全部结束"需要）
        let session_rows = sessions::Entity::find()
            .filter(
                Condition::any()
                    .add(sessions::Column::Status.is_in(LIVE_STATUSES))
                    .add(sessions::Column::ActivityId.is_in(activity_ids)),
            )
            .all(&self.pool)
            .await?;
        let live_group_buys = group_buys::Entity::find()
            .filter(group_buys::Column::Status.is_in(LIVE_STATUSES))
            .all(&self.pool)
            .await?;
        Ok(sweep_candidates_from(
            &live_activities,
            &session_rows,
            &live_group_buys,
            now,
        ))
    }

    async fn reserve_stock(
        &self,
        unit: StockUnit,
        qty: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        let txn = self.begin().await?;
        let reserved = reserve_in(&txn, unit, qty, now).await?;
        txn.commit().await?;
        Ok(reserved.reservation)
    }

    async fn release_stock(
        &self,
        unit: StockUnit,
        qty: i32,
        now: DateTime<Utc>,
    ) -> AppResult<ReleasedStock> {
        let txn = self.begin().await?;
        let released = release_in(&txn, unit, qty, now).await?;
        txn.commit().await?;
        Ok(released)
    }

    async fn adjust_quantity(
        &self,
        unit: StockUnit,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> AppResult<StockSnapshot> {
        let txn = self.begin().await?;
        let snapshot = match unit {
            StockUnit::SeckillProduct(id) => {
                let product = products::Entity::find_by_id(id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                let session = lock_session(&txn, product.session_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("session {}", product.session_id))
                    })?;
                let product = products::Entity::find_by_id(id)
                    .lock_exclusive()
                    .one(&txn)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                if quantity < product.sold_quantity {
                    return Err(AppError::ValidationError(format!(
                        "{unit} already sold {}, cannot set quantity to {quantity}",
                        product.sold_quantity
                    )));
                }

                let total = session.total_quantity + (quantity - product.quantity);
                let next = exhausted_status(session.status, session.sold_quantity, total)
                    .or_else(|| {
                        reopened_status(session.status, session.sold_quantity, total)
                            .filter(|_| now < session.end_time)
                    });
                let mut am = session.into_active_model();
                am.total_quantity = Set(total);
                if let Some(next) = next {
                    am.status = Set(next);
                }
                am.updated_at = Set(now);
                am.update(&txn).await?;

                let mut am = product.into_active_model();
                am.quantity = Set(quantity);
                am.updated_at = Set(now);
                snapshot_of_product(&am.update(&txn).await?)
            }
            StockUnit::GroupBuy(id) => {
                let gb = lock_group_buy(&txn, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                if quantity < gb.sold_quantity {
                    return Err(AppError::ValidationError(format!(
                        "{unit} already sold {}, cannot set quantity to {quantity}",
                        gb.sold_quantity
                    )));
                }
                let next = exhausted_status(gb.status, gb.sold_quantity, quantity).or_else(|| {
                    reopened_status(gb.status, gb.sold_quantity, quantity)
                        .filter(|_| now < gb.end_time)
                });
                let mut am = gb.into_active_model();
                am.total_quantity = Set(quantity);
                if let Some(next) = next {
                    am.status = Set(next);
                }
                am.updated_at = Set(now);
                snapshot_of_group_buy(&am.update(&txn).await?)
            }
        };
        txn.commit().await?;
        Ok(snapshot)
    }

    async fn admit_seckill(
        &self,
        req: &SeckillAdmissionRequest,
        now: DateTime<Utc>,
    ) -> AppResult<SeckillAdmission> {
        ensure_positive_quantity(req.quantity)?;
        let txn = self.begin().await?;

        let not_purchasable = |what: String| AppError::CampaignNotPurchasable(what);
        let product = products::Entity::find_by_id(req.seckill_product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                not_purchasable(format!(
                    "seckill product {} does not exist",
                    req.seckill_product_id
                ))
            })?;
        // 场次行锁串行化同场次的全部准入（含同一买家的并发请求）
        let session = lock_session(&txn, product.session_id)
            .await?
            .ok_or_else(|| not_purchasable(format!("session {} does not exist", product.session_id)))?;
        let product = products::Entity::find_by_id(product.id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| not_purchasable(format!("seckill product {} does not exist", product.id)))?;
        let activity = activities::Entity::find_by_id(session.activity_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                not_purchasable(format!("activity {} does not exist", session.activity_id))
            })?;

        ensure_purchasable(
            &format!("activity {}", activity.id),
            activity.status,
            activity.is_enabled,
        )?;
        ensure_purchasable(
            &format!("session {}", session.id),
            session.status,
            session.is_enabled,
        )?;
        if !product.is_enabled {
            return Err(not_purchasable(format!(
                "seckill product {} is disabled",
                product.id
            )));
        }

        let bought = seckill_orders::Entity::find()
            .filter(seckill_orders::Column::SessionId.eq(session.id))
            .filter(seckill_orders::Column::MemberId.eq(req.member_id))
            .filter(seckill_orders::Column::Status.ne(SeckillOrderStatus::Cancelled))
            .all(&txn)
            .await?;
        let (product_bought, session_bought) =
            PurchaseLimitGuard::seckill_existing(&bought, req.member_id, product.id);
        PurchaseLimitGuard::check_all(
            &[
                LimitCheck {
                    scope: LimitScope::SeckillProduct,
                    limit: product.max_quantity_per_user,
                    existing: product_bought,
                },
                LimitCheck {
                    scope: LimitScope::Session,
                    limit: session.max_quantity_per_user,
                    existing: session_bought,
                },
            ],
            req.quantity,
        )?;

        let reserved =
            reserve_in(&txn, StockUnit::SeckillProduct(product.id), req.quantity, now).await?;

        let total_amount = product.seckill_price * req.quantity as i64;
        let order_id =
            insert_order(&txn, req.member_id, OrderType::Seckill, total_amount, now).await?;
        let seckill_order = seckill_orders::ActiveModel {
            order_id: Set(order_id),
            session_id: Set(session.id),
            seckill_product_id: Set(product.id),
            member_id: Set(req.member_id),
            quantity: Set(req.quantity),
            original_price: Set(product.original_price),
            seckill_price: Set(product.seckill_price),
            status: Set(SeckillOrderStatus::Pending),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(SeckillAdmission {
            order_id,
            seckill_order_id: seckill_order.id,
            session_id: session.id,
            reservation: reserved.reservation,
            unit_price: product.seckill_price,
            total_amount,
            session_sold_out: reserved.sold_out,
        })
    }

    async fn admit_group_buy(
        &self,
        req: &GroupBuyJoinRequest,
        new_group_no: &str,
        now: DateTime<Utc>,
    ) -> AppResult<GroupBuyAdmission> {
        ensure_positive_quantity(req.quantity)?;
        let txn = self.begin().await?;

        let gb = lock_group_buy(&txn, req.group_buy_id)
            .await?
            .ok_or_else(|| {
                AppError::CampaignNotPurchasable(format!(
                    "group buy {} does not exist",
                    req.group_buy_id
                ))
            })?;
        ensure_purchasable(&format!("group buy {}", gb.id), gb.status, gb.is_enabled)?;

        let (group_no, is_leader, expire_time) = match &req.group_no {
            Some(group_no) => {
                let members = group_members(&txn, group_no).await?;
                let expire_time = check_joinable(&gb, group_no, &members, req.member_id, now)?;
                (group_no.clone(), false, expire_time)
            }
            None => {
                let taken = group_orders::Entity::find()
                    .filter(group_orders::Column::GroupNo.eq(new_group_no))
                    .one(&txn)
                    .await?;
                if taken.is_some() {
                    return Err(AppError::PersistenceConflict(format!(
                        "group number {new_group_no} already exists"
                    )));
                }
                let expire_time = now + Duration::hours(gb.expire_hours as i64);
                (new_group_no.to_string(), true, expire_time)
            }
        };

        let bought = group_orders::Entity::find()
            .filter(group_orders::Column::GroupBuyId.eq(gb.id))
            .filter(group_orders::Column::MemberId.eq(req.member_id))
            .all(&txn)
            .await?;
        PurchaseLimitGuard::check_all(
            &[LimitCheck {
                scope: LimitScope::GroupBuy,
                limit: gb.max_quantity_per_user,
                existing: PurchaseLimitGuard::group_buy_existing(&bought, req.member_id),
            }],
            req.quantity,
        )?;

        let reserved = reserve_in(&txn, StockUnit::GroupBuy(gb.id), req.quantity, now).await?;
        if is_leader {
            group_buys::Entity::update_many()
                .col_expr(
                    group_buys::Column::GroupCount,
                    Expr::col(group_buys::Column::GroupCount).add(1),
                )
                .filter(group_buys::Column::Id.eq(gb.id))
                .exec(&txn)
                .await?;
        }

        let total_amount = gb.group_price * req.quantity as i64;
        let order_id =
            insert_order(&txn, req.member_id, OrderType::GroupBuy, total_amount, now).await?;
        let group_order = group_orders::ActiveModel {
            group_no: Set(group_no.clone()),
            group_buy_id: Set(gb.id),
            order_id: Set(order_id),
            member_id: Set(req.member_id),
            quantity: Set(req.quantity),
            group_price: Set(gb.group_price),
            is_leader: Set(is_leader),
            status: Set(GroupBuyOrderStatus::Pending),
            expire_time: Set(expire_time),
            group_time: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(GroupBuyAdmission {
            order_id,
            group_buy_order_id: group_order.id,
            group_no,
            is_leader,
            expire_time,
            reservation: reserved.reservation,
            unit_price: gb.group_price,
            total_amount,
            sold_out: reserved.sold_out,
        })
    }

    async fn mark_seckill_paid(
        &self,
        seckill_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let txn = self.begin().await?;
        let order = seckill_orders::Entity::find_by_id(seckill_order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("seckill order {seckill_order_id}")))?;
        let res = seckill_orders::Entity::update_many()
            .col_expr(
                seckill_orders::Column::Status,
                Expr::value(SeckillOrderStatus::Paid),
            )
            .col_expr(seckill_orders::Column::PaidAt, Expr::value(now))
            .col_expr(seckill_orders::Column::UpdatedAt, Expr::value(now))
            .filter(seckill_orders::Column::Id.eq(seckill_order_id))
            .filter(seckill_orders::Column::Status.eq(SeckillOrderStatus::Pending))
            .exec(&txn)
            .await?;
        if res.rows_affected == 0 {
            return Ok(false);
        }
        set_orders_status(&txn, vec![order.order_id], OrderStatus::Paid, now).await?;
        txn.commit().await?;
        Ok(true)
    }

    async fn cancel_seckill_order(
        &self,
        seckill_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<ReleasedStock>> {
        let txn = self.begin().await?;
        let order = seckill_orders::Entity::find_by_id(seckill_order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("seckill order {seckill_order_id}")))?;
        if order.status != SeckillOrderStatus::Pending {
            return Ok(None);
        }
        lock_session(&txn, order.session_id).await?;

        let res = seckill_orders::Entity::update_many()
            .col_expr(
                seckill_orders::Column::Status,
                Expr::value(SeckillOrderStatus::Cancelled),
            )
            .col_expr(seckill_orders::Column::UpdatedAt, Expr::value(now))
            .filter(seckill_orders::Column::Id.eq(seckill_order_id))
            .filter(seckill_orders::Column::Status.eq(SeckillOrderStatus::Pending))
            .exec(&txn)
            .await?;
        if res.rows_affected == 0 {
            return Ok(None);
        }
        set_orders_status(&txn, vec![order.order_id], OrderStatus::Cancelled, now).await?;
        let released = release_in(
            &txn,
            StockUnit::SeckillProduct(order.seckill_product_id),
            order.quantity,
            now,
        )
        .await?;
        txn.commit().await?;
        Ok(Some(released))
    }

    async fn list_unpaid_seckill_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> AppResult<Vec<i64>> {
        let rows = seckill_orders::Entity::find()
            .filter(seckill_orders::Column::Status.eq(SeckillOrderStatus::Pending))
            .filter(seckill_orders::Column::CreatedAt.lt(created_before))
            .all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|o| o.id).collect())
    }

    async fn mark_group_order_paid(
        &self,
        group_buy_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<GroupPaymentMark> {
        let txn = self.begin().await?;
        let order = group_orders::Entity::find_by_id(group_buy_order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("group buy order {group_buy_order_id}")))?;
        // 与成团 / 失败使用同一把拼团活动行锁，保证看到的是结算后的状态
        lock_group_buy(&txn, order.group_buy_id).await?;
        let order = group_orders::Entity::find_by_id(group_buy_order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("group buy order {group_buy_order_id}")))?;

        let group_no = order.group_no.clone();
        let group_buy_id = order.group_buy_id;
        let mark = match order.status {
            GroupBuyOrderStatus::Pending => {
                let order_id = order.order_id;
                let mut am = order.into_active_model();
                am.status = Set(GroupBuyOrderStatus::Paid);
                am.paid_at = Set(Some(now));
                am.updated_at = Set(now);
                am.update(&txn).await?;
                set_orders_status(&txn, vec![order_id], OrderStatus::Paid, now).await?;
                GroupPaymentMark::Marked {
                    group_no,
                    group_buy_id,
                }
            }
            GroupBuyOrderStatus::Paid => GroupPaymentMark::AlreadyPaid {
                group_no,
                group_buy_id,
            },
            status => GroupPaymentMark::Resolved { group_no, status },
        };
        txn.commit().await?;
        Ok(mark)
    }

    async fn promote_group(
        &self,
        group_no: &str,
        now: DateTime<Utc>,
    ) -> AppResult<GroupPromotion> {
        let txn = self.begin().await?;
        let group_buy_id = group_members(&txn, group_no)
            .await?
            .first()
            .map(|m| m.group_buy_id)
            .ok_or_else(|| AppError::NotFound(format!("group {group_no}")))?;
        let gb = lock_group_buy(&txn, group_buy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("group buy {group_buy_id}")))?;

        let members = group_members(&txn, group_no).await?;
        if members.iter().any(|m| !m.status.is_open()) {
            return Ok(GroupPromotion::AlreadyResolved);
        }
        let paid = members
            .iter()
            .filter(|m| m.status == GroupBuyOrderStatus::Paid)
            .count() as i32;
        let expired = members.iter().any(|m| m.expire_time < now);
        if paid < gb.min_people || expired {
            return Ok(GroupPromotion::Waiting {
                paid,
                required: gb.min_people,
            });
        }

        group_orders::Entity::update_many()
            .col_expr(
                group_orders::Column::Status,
                Expr::value(GroupBuyOrderStatus::Grouped),
            )
            .col_expr(group_orders::Column::GroupTime, Expr::value(now))
            .col_expr(group_orders::Column::UpdatedAt, Expr::value(now))
            .filter(group_orders::Column::GroupNo.eq(group_no))
            .filter(group_orders::Column::Status.is_in(OPEN_GROUP_STATUSES))
            .exec(&txn)
            .await?;
        group_buys::Entity::update_many()
            .col_expr(
                group_buys::Column::SuccessGroupCount,
                Expr::col(group_buys::Column::SuccessGroupCount).add(1),
            )
            .col_expr(group_buys::Column::UpdatedAt, Expr::value(now))
            .filter(group_buys::Column::Id.eq(gb.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(GroupPromotion::Promoted {
            group_buy_id: gb.id,
            member_ids: members.iter().map(|m| m.member_id).collect(),
        })
    }

    async fn list_expired_groups(&self, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        let rows = group_orders::Entity::find()
            .filter(group_orders::Column::Status.is_in(OPEN_GROUP_STATUSES))
            .filter(group_orders::Column::ExpireTime.lt(now))
            .all(&self.pool)
            .await?;
        let groups: BTreeSet<String> = rows.into_iter().map(|o| o.group_no).collect();
        Ok(groups.into_iter().collect())
    }

    async fn fail_group(
        &self,
        group_no: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<FailedGroup>> {
        let txn = self.begin().await?;
        let Some(group_buy_id) = group_members(&txn, group_no)
            .await?
            .first()
            .map(|m| m.group_buy_id)
        else {
            return Ok(None);
        };
        lock_group_buy(&txn, group_buy_id).await?;

        let members = group_members(&txn, group_no).await?;
        let expired = members.iter().all(|m| m.expire_time < now);
        if members.iter().any(|m| !m.status.is_open()) || !expired {
            return Ok(None);
        }

        group_orders::Entity::update_many()
            .col_expr(
                group_orders::Column::Status,
                Expr::value(GroupBuyOrderStatus::Failed),
            )
            .col_expr(group_orders::Column::UpdatedAt, Expr::value(now))
            .filter(group_orders::Column::GroupNo.eq(group_no))
            .filter(group_orders::Column::Status.is_in(OPEN_GROUP_STATUSES))
            .exec(&txn)
            .await?;
        set_orders_status(
            &txn,
            members.iter().map(|m| m.order_id).collect(),
            OrderStatus::Closed,
            now,
        )
        .await?;

        let quantity: i32 = members.iter().map(|m| m.quantity).sum();
        let released = release_in(&txn, StockUnit::GroupBuy(group_buy_id), quantity, now).await?;
        txn.commit().await?;

        Ok(Some(FailedGroup {
            group_no: group_no.to_string(),
            group_buy_id,
            members: members
                .iter()
                .map(|m| FailedMember {
                    group_buy_order_id: m.id,
                    order_id: m.order_id,
                    member_id: m.member_id,
                    quantity: m.quantity,
                    amount: m.group_price * m.quantity as i64,
                    was_paid: m.status == GroupBuyOrderStatus::Paid,
                })
                .collect(),
            released,
        }))
    }
}
