//! 进程内仓储
//!
//! 一把 `tokio::sync::Mutex` 保护全部表，每个操作在锁内对暂存副本修改，
//! 成功后整体写回，失败则丢弃副本，相当于一次可回滚的事务。
//! 未配置数据库时由二进制使用，同时是场景测试的存储。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::DbErr;
use tokio::sync::Mutex;

use super::{
    PromotionRepository, check_joinable, ensure_positive_quantity, ensure_purchasable,
    exhausted_status, reopened_status, sweep_candidates_from, try_reserve,
};
use crate::entities::{
    CampaignStatus, GroupBuyOrderStatus, OrderStatus, OrderType, SeckillOrderStatus,
    activity_entity, group_buy_entity, group_buy_order_entity, order_entity,
    seckill_order_entity, seckill_product_entity, seckill_session_entity,
};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::services::purchase_limit::{LimitCheck, LimitScope, PurchaseLimitGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    seq: i64,
    activities: BTreeMap<i64, activity_entity::Model>,
    sessions: BTreeMap<i64, seckill_session_entity::Model>,
    products: BTreeMap<i64, seckill_product_entity::Model>,
    seckill_orders: BTreeMap<i64, seckill_order_entity::Model>,
    group_buys: BTreeMap<i64, group_buy_entity::Model>,
    group_orders: BTreeMap<i64, group_buy_order_entity::Model>,
    orders: BTreeMap<i64, order_entity::Model>,
}

/// 预留结果 + 所属活动是否因此售罄
struct Reserved {
    reservation: Reservation,
    sold_out: bool,
}

#[derive(Default)]
pub struct MemoryPromotionRepository {
    tables: Mutex<Tables>,
    fail_next_order_insert: AtomicBool,
    injected_conflicts: AtomicUsize,
}

impl MemoryPromotionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次写订单行时失败（验证准入的全有或全无）
    pub fn fail_next_order_insert(&self) {
        self.fail_next_order_insert.store(true, Ordering::SeqCst);
    }

    /// 接下来 n 次准入以 PersistenceConflict 失败（验证重试策略）
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// 测试辅助：订单表快照
    pub async fn orders(&self) -> Vec<order_entity::Model> {
        self.tables.lock().await.orders.values().cloned().collect()
    }

    pub async fn seckill_orders(&self) -> Vec<seckill_order_entity::Model> {
        self.tables.lock().await.seckill_orders.values().cloned().collect()
    }

    pub async fn group_orders(&self) -> Vec<group_buy_order_entity::Model> {
        self.tables.lock().await.group_orders.values().cloned().collect()
    }

    async fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> AppResult<T> + Send,
    ) -> AppResult<T> {
        let mut guard = self.tables.lock().await;
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        *guard = staged;
        Ok(out)
    }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> T + Send) -> T {
        let guard = self.tables.lock().await;
        f(&guard)
    }

    fn take_injected_conflict(&self) -> AppResult<()> {
        let hit = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            return Err(AppError::PersistenceConflict(
                "could not obtain lock on row (injected)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    fn snapshot(&self, unit: StockUnit) -> AppResult<StockSnapshot> {
        match unit {
            StockUnit::SeckillProduct(id) => {
                let p = self
                    .products
                    .get(&id)
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                Ok(StockSnapshot {
                    unit,
                    product_id: p.product_id,
                    sku_id: p.product_sku_id,
                    quantity: p.quantity,
                    sold_quantity: p.sold_quantity,
                })
            }
            StockUnit::GroupBuy(id) => {
                let g = self
                    .group_buys
                    .get(&id)
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                Ok(StockSnapshot {
                    unit,
                    product_id: g.product_id,
                    sku_id: g.sku_id,
                    quantity: g.total_quantity,
                    sold_quantity: g.sold_quantity,
                })
            }
        }
    }

    fn reserve(&mut self, unit: StockUnit, qty: i32, now: DateTime<Utc>) -> AppResult<Reserved> {
        ensure_positive_quantity(qty)?;
        match unit {
            StockUnit::SeckillProduct(id) => {
                let product = self
                    .products
                    .get_mut(&id)
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                let sold = try_reserve(unit, product.sold_quantity, product.quantity, qty)?;
                product.sold_quantity = sold;
                product.updated_at = now;
                let reservation = Reservation {
                    unit,
                    sold_quantity: sold,
                    quantity: product.quantity,
                };
                let session_id = product.session_id;

                let session = self
                    .sessions
                    .get_mut(&session_id)
                    .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
                session.sold_quantity += qty;
                session.updated_at = now;
                let next = exhausted_status(
                    session.status,
                    session.sold_quantity,
                    session.total_quantity,
                );
                if let Some(next) = next {
                    session.status = next;
                }
                Ok(Reserved {
                    reservation,
                    sold_out: next.is_some(),
                })
            }
            StockUnit::GroupBuy(id) => {
                let gb = self
                    .group_buys
                    .get_mut(&id)
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                let sold = try_reserve(unit, gb.sold_quantity, gb.total_quantity, qty)?;
                gb.sold_quantity = sold;
                gb.updated_at = now;
                let next = exhausted_status(gb.status, sold, gb.total_quantity);
                if let Some(next) = next {
                    gb.status = next;
                }
                Ok(Reserved {
                    reservation: Reservation {
                        unit,
                        sold_quantity: sold,
                        quantity: gb.total_quantity,
                    },
                    sold_out: next.is_some(),
                })
            }
        }
    }

    fn release(&mut self, unit: StockUnit, qty: i32, now: DateTime<Utc>) -> AppResult<ReleasedStock> {
        ensure_positive_quantity(qty)?;
        match unit {
            StockUnit::SeckillProduct(id) => {
                let product = self
                    .products
                    .get_mut(&id)
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                let released = qty.min(product.sold_quantity);
                product.sold_quantity -= released;
                product.updated_at = now;
                let (sold, quantity, session_id) =
                    (product.sold_quantity, product.quantity, product.session_id);

                let session = self
                    .sessions
                    .get_mut(&session_id)
                    .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
                session.sold_quantity = (session.sold_quantity - released).max(0);
                session.updated_at = now;
                let reopen = reopened_status(
                    session.status,
                    session.sold_quantity,
                    session.total_quantity,
                )
                .filter(|_| now < session.end_time);
                if let Some(next) = reopen {
                    session.status = next;
                }
                Ok(ReleasedStock {
                    unit,
                    released,
                    sold_quantity: sold,
                    quantity,
                    reopened: reopen.is_some(),
                })
            }
            StockUnit::GroupBuy(id) => {
                let gb = self
                    .group_buys
                    .get_mut(&id)
                    .ok_or_else(|| AppError::NotFound(format!("{unit}")))?;
                let released = qty.min(gb.sold_quantity);
                gb.sold_quantity -= released;
                gb.updated_at = now;
                let reopen = reopened_status(gb.status, gb.sold_quantity, gb.total_quantity)
                    .filter(|_| now < gb.end_time);
                if let Some(next) = reopen {
                    gb.status = next;
                }
                Ok(ReleasedStock {
                    unit,
                    released,
                    sold_quantity: gb.sold_quantity,
                    quantity: gb.total_quantity,
                    reopened: reopen.is_some(),
                })
            }
        }
    }

    fn insert_order(
        &mut self,
        member_id: i64,
        order_type: OrderType,
        total_amount: i64,
        now: DateTime<Utc>,
        fail: &AtomicBool,
    ) -> AppResult<i64> {
        if fail.swap(false, Ordering::SeqCst) {
            return Err(DbErr::Custom("insert into orders failed (injected)".to_string()).into());
        }
        let id = self.next_id();
        self.orders.insert(
            id,
            order_entity::Model {
                id,
                member_id,
                order_type,
                total_amount,
                status: OrderStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    fn set_order_status(&mut self, order_id: i64, status: OrderStatus, now: DateTime<Utc>) {
        if let Some(order) = self.orders.get_mut(&order_id) {
            order.status = status;
            order.updated_at = now;
        }
    }

    fn group_members(&self, group_no: &str) -> Vec<group_buy_order_entity::Model> {
        self.group_orders
            .values()
            .filter(|o| o.group_no == group_no)
            .cloned()
            .collect()
    }

    fn set_status(
        &mut self,
        campaign: CampaignRef,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let not_found = || AppError::NotFound(format!("{campaign}"));
        let (status, updated_at) = match campaign {
            CampaignRef::Activity(id) => {
                let a = self.activities.get_mut(&id).ok_or_else(not_found)?;
                (&mut a.status, &mut a.updated_at)
            }
            CampaignRef::Session(id) => {
                let s = self.sessions.get_mut(&id).ok_or_else(not_found)?;
                (&mut s.status, &mut s.updated_at)
            }
            CampaignRef::GroupBuy(id) => {
                let g = self.group_buys.get_mut(&id).ok_or_else(not_found)?;
                (&mut g.status, &mut g.updated_at)
            }
        };
        if !from.contains(&*status) {
            return Ok(false);
        }
        *status = to;
        *updated_at = now;
        Ok(true)
    }
}

#[async_trait]
impl PromotionRepository for MemoryPromotionRepository {
    async fn create_activity(
        &self,
        new: &NewActivity,
        now: DateTime<Utc>,
    ) -> AppResult<activity_entity::Model> {
        self.transaction(|t| {
            let id = t.next_id();
            let model = activity_entity::Model {
                id,
                title: new.title.clone(),
                status: CampaignStatus::Pending,
                is_enabled: true,
                rules: new.rules.clone(),
                created_at: now,
                updated_at: now,
            };
            t.activities.insert(id, model.clone());
            Ok(model)
        })
        .await
    }

    async fn create_session(
        &self,
        new: &NewSession,
        now: DateTime<Utc>,
    ) -> AppResult<seckill_session_entity::Model> {
        self.transaction(|t| {
            if !t.activities.contains_key(&new.activity_id) {
                return Err(AppError::NotFound(format!("activity {}", new.activity_id)));
            }
            let id = t.next_id();
            let model = seckill_session_entity::Model {
                id,
                activity_id: new.activity_id,
                start_time: new.start_time,
                end_time: new.end_time,
                status: CampaignStatus::Pending,
                max_quantity_per_user: new.max_quantity_per_user,
                total_quantity: 0,
                sold_quantity: 0,
                is_enabled: true,
                created_at: now,
                updated_at: now,
            };
            t.sessions.insert(id, model.clone());
            Ok(model)
        })
        .await
    }

    async fn create_seckill_product(
        &self,
        new: &NewSeckillProduct,
        original_price: i64,
        now: DateTime<Utc>,
    ) -> AppResult<seckill_product_entity::Model> {
        self.transaction(|t| {
            let duplicate = t.products.values().any(|p| {
                p.session_id == new.session_id && p.product_sku_id == new.product_sku_id
            });
            if duplicate {
                return Err(AppError::ValidationError(format!(
                    "SKU {} is already on sale in session {}",
                    new.product_sku_id, new.session_id
                )));
            }

            let session = t
                .sessions
                .get_mut(&new.session_id)
                .ok_or_else(|| AppError::NotFound(format!("session {}", new.session_id)))?;
            session.total_quantity += new.quantity;
            session.updated_at = now;
            if let Some(next) = reopened_status(
                session.status,
                session.sold_quantity,
                session.total_quantity,
            )
            .filter(|_| now < session.end_time)
            {
                session.status = next;
            }

            let id = t.next_id();
            let model = seckill_product_entity::Model {
                id,
                session_id: new.session_id,
                product_id: new.product_id,
                product_sku_id: new.product_sku_id,
                original_price,
                seckill_price: new.seckill_price,
                quantity: new.quantity,
                sold_quantity: 0,
                max_quantity_per_user: new.max_quantity_per_user,
                is_enabled: true,
                created_at: now,
                updated_at: now,
            };
            t.products.insert(id, model.clone());
            Ok(model)
        })
        .await
    }

    async fn create_group_buy(
        &self,
        new: &NewGroupBuy,
        original_price: i64,
        now: DateTime<Utc>,
    ) -> AppResult<group_buy_entity::Model> {
        self.transaction(|t| {
            let id = t.next_id();
            let model = group_buy_entity::Model {
                id,
                title: new.title.clone(),
                product_id: new.product_id,
                sku_id: new.sku_id,
                original_price,
                group_price: new.group_price,
                min_people: new.min_people,
                max_people: new.max_people,
                max_quantity_per_user: new.max_quantity_per_user,
                expire_hours: new.expire_hours,
                total_quantity: new.total_quantity,
                sold_quantity: 0,
                group_count: 0,
                success_group_count: 0,
                status: CampaignStatus::Pending,
                is_enabled: true,
                start_time: new.start_time,
                end_time: new.end_time,
                created_at: now,
                updated_at: now,
            };
            t.group_buys.insert(id, model.clone());
            Ok(model)
        })
        .await
    }

    async fn find_activity(&self, id: i64) -> AppResult<Option<activity_entity::Model>> {
        Ok(self.read(|t| t.activities.get(&id).cloned()).await)
    }

    async fn find_session(&self, id: i64) -> AppResult<Option<seckill_session_entity::Model>> {
        Ok(self.read(|t| t.sessions.get(&id).cloned()).await)
    }

    async fn find_seckill_product(
        &self,
        id: i64,
    ) -> AppResult<Option<seckill_product_entity::Model>> {
        Ok(self.read(|t| t.products.get(&id).cloned()).await)
    }

    async fn find_group_buy(&self, id: i64) -> AppResult<Option<group_buy_entity::Model>> {
        Ok(self.read(|t| t.group_buys.get(&id).cloned()).await)
    }

    async fn find_seckill_order(
        &self,
        id: i64,
    ) -> AppResult<Option<seckill_order_entity::Model>> {
        Ok(self.read(|t| t.seckill_orders.get(&id).cloned()).await)
    }

    async fn find_group_buy_order(
        &self,
        id: i64,
    ) -> AppResult<Option<group_buy_order_entity::Model>> {
        Ok(self.read(|t| t.group_orders.get(&id).cloned()).await)
    }

    async fn list_group_members(
        &self,
        group_no: &str,
    ) -> AppResult<Vec<group_buy_order_entity::Model>> {
        Ok(self.read(|t| t.group_members(group_no)).await)
    }

    async fn list_stock_units_for_product(
        &self,
        product_id: i64,
    ) -> AppResult<Vec<StockSnapshot>> {
        self.read(|t| {
            let units = t
                .products
                .values()
                .filter(|p| p.product_id == product_id)
                .map(|p| StockUnit::SeckillProduct(p.id))
                .chain(
                    t.group_buys
                        .values()
                        .filter(|g| g.product_id == product_id)
                        .map(|g| StockUnit::GroupBuy(g.id)),
                );
            units.map(|u| t.snapshot(u)).collect()
        })
        .await
    }

    async fn campaign_status(&self, campaign: CampaignRef) -> AppResult<Option<CampaignStatus>> {
        Ok(self
            .read(|t| match campaign {
                CampaignRef::Activity(id) => t.activities.get(&id).map(|a| a.status),
                CampaignRef::Session(id) => t.sessions.get(&id).map(|s| s.status),
                CampaignRef::GroupBuy(id) => t.group_buys.get(&id).map(|g| g.status),
            })
            .await)
    }

    async fn transition_status(
        &self,
        campaign: CampaignRef,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.transaction(|t| t.set_status(campaign, from, to, now))
            .await
    }

    async fn set_enabled(
        &self,
        campaign: CampaignRef,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.transaction(|t| {
            let slot = match campaign {
                CampaignRef::Activity(id) => t
                    .activities
                    .get_mut(&id)
                    .map(|a| (&mut a.is_enabled, &mut a.updated_at)),
                CampaignRef::Session(id) => t
                    .sessions
                    .get_mut(&id)
                    .map(|s| (&mut s.is_enabled, &mut s.updated_at)),
                CampaignRef::GroupBuy(id) => t
                    .group_buys
                    .get_mut(&id)
                    .map(|g| (&mut g.is_enabled, &mut g.updated_at)),
            };
            Ok(match slot {
                Some((flag, updated_at)) => {
                    *flag = enabled;
                    *updated_at = now;
                    true
                }
                None => false,
            })
        })
        .await
    }

    async fn sweep_candidates(&self, now: DateTime<Utc>) -> AppResult<SweepCandidates> {
        Ok(self
            .read(|t| {
                sweep_candidates_from(
                    t.activities.values(),
                    t.sessions.values(),
                    t.group_buys.values(),
                    now,
                )
            })
            .await)
    }

    async fn reserve_stock(
        &self,
        unit: StockUnit,
        qty: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        self.transaction(|t| t.reserve(unit, qty, now).map(|r| r.reservation))
            .await
    }

    async fn release_stock(
        &self,
        unit: StockUnit,
        qty: i32,
        now: DateTime<Utc>,
    ) -> AppResult<ReleasedStock> {
        self.transaction(|t| t.release(unit, qty, now)).await
    }

    async fn adjust_quantity(
        &self,
        unit: StockUnit,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> AppResult<StockSnapshot> {
        self.transaction(|t| {
            let current = t.snapshot(unit)?;
            if quantity < current.sold_quantity {
                return Err(AppError::ValidationError(format!(
                    "{unit} already sold {}, cannot set quantity to {quantity}",
                    current.sold_quantity
                )));
            }
            let delta = quantity - current.quantity;
            match unit {
                StockUnit::SeckillProduct(id) => {
                    let session_id = match t.products.get_mut(&id) {
                        Some(p) => {
                            p.quantity = quantity;
                            p.updated_at = now;
                            p.session_id
                        }
                        None => return Err(AppError::NotFound(format!("{unit}"))),
                    };
                    if let Some(s) = t.sessions.get_mut(&session_id) {
                        s.total_quantity += delta;
                        s.updated_at = now;
                        let next = exhausted_status(s.status, s.sold_quantity, s.total_quantity)
                            .or_else(|| {
                                reopened_status(s.status, s.sold_quantity, s.total_quantity)
                                    .filter(|_| now < s.end_time)
                            });
                        if let Some(next) = next {
                            s.status = next;
                        }
                    }
                }
                StockUnit::GroupBuy(id) => {
                    if let Some(g) = t.group_buys.get_mut(&id) {
                        g.total_quantity = quantity;
                        g.updated_at = now;
                        let next = exhausted_status(g.status, g.sold_quantity, g.total_quantity)
                            .or_else(|| {
                                reopened_status(g.status, g.sold_quantity, g.total_quantity)
                                    .filter(|_| now < g.end_time)
                            });
                        if let Some(next) = next {
                            g.status = next;
                        }
                    }
                }
            }
            t.snapshot(unit)
        })
        .await
    }

    async fn admit_seckill(
        &self,
        req: &SeckillAdmissionRequest,
        now: DateTime<Utc>,
    ) -> AppResult<SeckillAdmission> {
        self.take_injected_conflict()?;
        let fail = &self.fail_next_order_insert;
        self.transaction(|t| {
            ensure_positive_quantity(req.quantity)?;
            let product = t.products.get(&req.seckill_product_id).cloned().ok_or_else(|| {
                AppError::CampaignNotPurchasable(format!(
                    "seckill product {} does not exist",
                    req.seckill_product_id
                ))
            })?;
            let session = t.sessions.get(&product.session_id).cloned().ok_or_else(|| {
                AppError::CampaignNotPurchasable(format!(
                    "session {} does not exist",
                    product.session_id
                ))
            })?;
            let activity = t.activities.get(&session.activity_id).cloned().ok_or_else(|| {
                AppError::CampaignNotPurchasable(format!(
                    "activity {} does not exist",
                    session.activity_id
                ))
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
                return Err(AppError::CampaignNotPurchasable(format!(
                    "seckill product {} is disabled",
                    product.id
                )));
            }

            let (product_bought, session_bought) = PurchaseLimitGuard::seckill_existing(
                t.seckill_orders.values().filter(|o| o.session_id == session.id),
                req.member_id,
                product.id,
            );
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

            let reserved = t.reserve(StockUnit::SeckillProduct(product.id), req.quantity, now)?;

            let total_amount = product.seckill_price * req.quantity as i64;
            let order_id =
                t.insert_order(req.member_id, OrderType::Seckill, total_amount, now, fail)?;
            let seckill_order_id = t.next_id();
            t.seckill_orders.insert(
                seckill_order_id,
                seckill_order_entity::Model {
                    id: seckill_order_id,
                    order_id,
                    session_id: session.id,
                    seckill_product_id: product.id,
                    member_id: req.member_id,
                    quantity: req.quantity,
                    original_price: product.original_price,
                    seckill_price: product.seckill_price,
                    status: SeckillOrderStatus::Pending,
                    paid_at: None,
                    created_at: now,
                    updated_at: now,
                },
            );

            Ok(SeckillAdmission {
                order_id,
                seckill_order_id,
                session_id: session.id,
                reservation: reserved.reservation,
                unit_price: product.seckill_price,
                total_amount,
                session_sold_out: reserved.sold_out,
            })
        })
        .await
    }

    async fn admit_group_buy(
        &self,
        req: &GroupBuyJoinRequest,
        new_group_no: &str,
        now: DateTime<Utc>,
    ) -> AppResult<GroupBuyAdmission> {
        self.take_injected_conflict()?;
        let fail = &self.fail_next_order_insert;
        self.transaction(|t| {
            ensure_positive_quantity(req.quantity)?;
            let gb = t.group_buys.get(&req.group_buy_id).cloned().ok_or_else(|| {
                AppError::CampaignNotPurchasable(format!(
                    "group buy {} does not exist",
                    req.group_buy_id
                ))
            })?;
            ensure_purchasable(&format!("group buy {}", gb.id), gb.status, gb.is_enabled)?;

            let (group_no, is_leader, expire_time) = match &req.group_no {
                Some(group_no) => {
                    let members = t.group_members(group_no);
                    let expire_time =
                        check_joinable(&gb, group_no, &members, req.member_id, now)?;
                    (group_no.clone(), false, expire_time)
                }
                None => {
                    if t.group_orders.values().any(|o| o.group_no == new_group_no) {
                        return Err(AppError::PersistenceConflict(format!(
                            "group number {new_group_no} already exists"
                        )));
                    }
                    let expire_time = now + Duration::hours(gb.expire_hours as i64);
                    (new_group_no.to_string(), true, expire_time)
                }
            };

            let existing = PurchaseLimitGuard::group_buy_existing(
                t.group_orders.values().filter(|o| o.group_buy_id == gb.id),
                req.member_id,
            );
            PurchaseLimitGuard::check_all(
                &[LimitCheck {
                    scope: LimitScope::GroupBuy,
                    limit: gb.max_quantity_per_user,
                    existing,
                }],
                req.quantity,
            )?;

            let reserved = t.reserve(StockUnit::GroupBuy(gb.id), req.quantity, now)?;
            if is_leader {
                if let Some(g) = t.group_buys.get_mut(&gb.id) {
                    g.group_count += 1;
                }
            }

            let total_amount = gb.group_price * req.quantity as i64;
            let order_id =
                t.insert_order(req.member_id, OrderType::GroupBuy, total_amount, now, fail)?;
            let group_buy_order_id = t.next_id();
            t.group_orders.insert(
                group_buy_order_id,
                group_buy_order_entity::Model {
                    id: group_buy_order_id,
                    group_no: group_no.clone(),
                    group_buy_id: gb.id,
                    order_id,
                    member_id: req.member_id,
                    quantity: req.quantity,
                    group_price: gb.group_price,
                    is_leader,
                    status: GroupBuyOrderStatus::Pending,
                    expire_time,
                    group_time: None,
                    paid_at: None,
                    created_at: now,
                    updated_at: now,
                },
            );

            Ok(GroupBuyAdmission {
                order_id,
                group_buy_order_id,
                group_no,
                is_leader,
                expire_time,
                reservation: reserved.reservation,
                unit_price: gb.group_price,
                total_amount,
                sold_out: reserved.sold_out,
            })
        })
        .await
    }

    async fn mark_seckill_paid(
        &self,
        seckill_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.transaction(|t| {
            let order = t
                .seckill_orders
                .get_mut(&seckill_order_id)
                .ok_or_else(|| AppError::NotFound(format!("seckill order {seckill_order_id}")))?;
            if order.status != SeckillOrderStatus::Pending {
                return Ok(false);
            }
            order.status = SeckillOrderStatus::Paid;
            order.paid_at = Some(now);
            order.updated_at = now;
            let order_id = order.order_id;
            t.set_order_status(order_id, OrderStatus::Paid, now);
            Ok(true)
        })
        .await
    }

    async fn cancel_seckill_order(
        &self,
        seckill_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<ReleasedStock>> {
        self.transaction(|t| {
            let order = t
                .seckill_orders
                .get_mut(&seckill_order_id)
                .ok_or_else(|| AppError::NotFound(format!("seckill order {seckill_order_id}")))?;
            if order.status != SeckillOrderStatus::Pending {
                return Ok(None);
            }
            order.status = SeckillOrderStatus::Cancelled;
            order.updated_at = now;
            let (order_id, product_id, qty) =
                (order.order_id, order.seckill_product_id, order.quantity);
            t.set_order_status(order_id, OrderStatus::Cancelled, now);
            t.release(StockUnit::SeckillProduct(product_id), qty, now)
                .map(Some)
        })
        .await
    }

    async fn list_unpaid_seckill_orders(
        &self,
        created_before: DateTime<Utc>,
    ) -> AppResult<Vec<i64>> {
        Ok(self
            .read(|t| {
                t.seckill_orders
                    .values()
                    .filter(|o| {
                        o.status == SeckillOrderStatus::Pending && o.created_at < created_before
                    })
                    .map(|o| o.id)
                    .collect()
            })
            .await)
    }

    async fn mark_group_order_paid(
        &self,
        group_buy_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<GroupPaymentMark> {
        self.transaction(|t| {
            let order = t.group_orders.get_mut(&group_buy_order_id).ok_or_else(|| {
                AppError::NotFound(format!("group buy order {group_buy_order_id}"))
            })?;
            let group_no = order.group_no.clone();
            let group_buy_id = order.group_buy_id;
            match order.status {
                GroupBuyOrderStatus::Pending => {
                    order.status = GroupBuyOrderStatus::Paid;
                    order.paid_at = Some(now);
                    order.updated_at = now;
                    let order_id = order.order_id;
                    t.set_order_status(order_id, OrderStatus::Paid, now);
                    Ok(GroupPaymentMark::Marked {
                        group_no,
                        group_buy_id,
                    })
                }
                GroupBuyOrderStatus::Paid => Ok(GroupPaymentMark::AlreadyPaid {
                    group_no,
                    group_buy_id,
                }),
                status => Ok(GroupPaymentMark::Resolved { group_no, status }),
            }
        })
        .await
    }

    async fn promote_group(
        &self,
        group_no: &str,
        now: DateTime<Utc>,
    ) -> AppResult<GroupPromotion> {
        self.transaction(|t| {
            let members = t.group_members(group_no);
            let first = members
                .first()
                .ok_or_else(|| AppError::NotFound(format!("group {group_no}")))?;
            if members.iter().any(|m| !m.status.is_open()) {
                return Ok(GroupPromotion::AlreadyResolved);
            }
            let group_buy_id = first.group_buy_id;
            let required = t
                .group_buys
                .get(&group_buy_id)
                .map(|g| g.min_people)
                .ok_or_else(|| AppError::NotFound(format!("group buy {group_buy_id}")))?;
            let paid = members
                .iter()
                .filter(|m| m.status == GroupBuyOrderStatus::Paid)
                .count() as i32;
            if paid < required || first.expire_time < now {
                return Ok(GroupPromotion::Waiting { paid, required });
            }

            let mut member_ids = Vec::with_capacity(members.len());
            for m in &members {
                if let Some(row) = t.group_orders.get_mut(&m.id) {
                    row.status = GroupBuyOrderStatus::Grouped;
                    row.group_time = Some(now);
                    row.updated_at = now;
                }
                member_ids.push(m.member_id);
            }
            if let Some(g) = t.group_buys.get_mut(&group_buy_id) {
                g.success_group_count += 1;
                g.updated_at = now;
            }
            Ok(GroupPromotion::Promoted {
                group_buy_id,
                member_ids,
            })
        })
        .await
    }

    async fn list_expired_groups(&self, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        Ok(self
            .read(|t| {
                let resolved: BTreeSet<&str> = t
                    .group_orders
                    .values()
                    .filter(|o| !o.status.is_open())
                    .map(|o| o.group_no.as_str())
                    .collect();
                let expired: BTreeSet<&str> = t
                    .group_orders
                    .values()
                    .filter(|o| o.status.is_open() && o.expire_time < now)
                    .map(|o| o.group_no.as_str())
                    .filter(|no| !resolved.contains(no))
                    .collect();
                expired.into_iter().map(str::to_string).collect()
            })
            .await)
    }

    async fn fail_group(
        &self,
        group_no: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<FailedGroup>> {
        self.transaction(|t| {
            let members = t.group_members(group_no);
            let Some(first) = members.first() else {
                return Ok(None);
            };
            if members.iter().any(|m| !m.status.is_open()) || first.expire_time >= now {
                return Ok(None);
            }
            let group_buy_id = first.group_buy_id;

            let mut failed = Vec::with_capacity(members.len());
            let mut quantity = 0;
            for m in &members {
                if let Some(row) = t.group_orders.get_mut(&m.id) {
                    row.status = GroupBuyOrderStatus::Failed;
                    row.updated_at = now;
                }
                t.set_order_status(m.order_id, OrderStatus::Closed, now);
                quantity += m.quantity;
                failed.push(FailedMember {
                    group_buy_order_id: m.id,
                    order_id: m.order_id,
                    member_id: m.member_id,
                    quantity: m.quantity,
                    amount: m.group_price * m.quantity as i64,
                    was_paid: m.status == GroupBuyOrderStatus::Paid,
                });
            }
            let released = t.release(StockUnit::GroupBuy(group_buy_id), quantity, now)?;
            Ok(Some(FailedGroup {
                group_no: group_no.to_string(),
                group_buy_id,
                members: failed,
                released,
            }))
        })
        .await
    }
}
