//! 订单准入流水线
//!
//! 状态校验 -> 限购 -> 扣库存 -> 写订单 由仓储在一个原子单元内完成，
//! 这里负责参数校验、存储冲突的有限重试、整体超时以及成功后的事件投递。
//! 超时只在两次尝试之间判断，进行中的尝试不会被取消：要么完整提交并返回
//! 成功，要么失败回滚。单次尝试的锁等待由仓储自身限制。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::entities::CampaignStatus;
use crate::error::{AppError, AppResult};
use crate::events::{DomainEvent, EventPublisher};
use crate::models::*;
use crate::repositories::PromotionRepository;
use crate::services::StockLedger;
use crate::utils::{RetryPolicy, generate_group_no, retry_on_conflict, retry_within};

#[derive(Clone)]
pub struct AdmissionService {
    repo: Arc<dyn PromotionRepository>,
    ledger: StockLedger,
    events: EventPublisher,
    retry: RetryPolicy,
    timeout: Duration,
}

impl AdmissionService {
    pub fn new(
        repo: Arc<dyn PromotionRepository>,
        events: EventPublisher,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        let ledger = StockLedger::new(repo.clone(), events.clone());
        Self {
            repo,
            ledger,
            events,
            retry,
            timeout,
        }
    }

    /// 秒杀下单
    pub async fn admit_seckill(&self, req: SeckillAdmissionRequest) -> AppResult<SeckillAdmission> {
        validate_quantity(req.quantity)?;
        let repo = &self.repo;
        let result = retry_within(&self.retry, self.timeout, "seckill admission", || {
            repo.admit_seckill(&req, Utc::now())
        })
        .await;

        match result {
            Ok(admission) => {
                log::info!(
                    "Member {} admitted to seckill product {} x{} (order {}, sold {}/{})",
                    req.member_id,
                    req.seckill_product_id,
                    req.quantity,
                    admission.order_id,
                    admission.reservation.sold_quantity,
                    admission.reservation.quantity
                );
                self.ledger.record_reservation(&admission.reservation);
                if admission.session_sold_out {
                    self.events.status_changed(
                        CampaignRef::Session(admission.session_id),
                        CampaignStatus::SoldOut,
                    );
                }
                Ok(admission)
            }
            Err(e) => Err(log_rejection(
                &format!(
                    "member {} seckill product {}",
                    req.member_id, req.seckill_product_id
                ),
                e,
            )),
        }
    }

    /// 拼团下单：开新团（group_no 为空）或加入已有团
    ///
    /// 每次尝试重新生成团号，团号碰撞以 PersistenceConflict 返回并重试。
    pub async fn join_group_buy(&self, req: GroupBuyJoinRequest) -> AppResult<GroupBuyAdmission> {
        validate_quantity(req.quantity)?;
        if let Some(group_no) = &req.group_no {
            if group_no.trim().is_empty() {
                return Err(AppError::ValidationError("group_no cannot be blank".into()));
            }
        }
        let repo = &self.repo;
        let result = retry_within(&self.retry, self.timeout, "group buy admission", || {
            let now = Utc::now();
            let group_no = generate_group_no(now);
            let req = &req;
            async move { repo.admit_group_buy(req, &group_no, now).await }
        })
        .await;

        match result {
            Ok(admission) => {
                log::info!(
                    "Member {} {} group {} of group buy {} x{} (order {})",
                    req.member_id,
                    if admission.is_leader { "opened" } else { "joined" },
                    admission.group_no,
                    req.group_buy_id,
                    req.quantity,
                    admission.order_id
                );
                self.ledger.record_reservation(&admission.reservation);
                if admission.sold_out {
                    self.events.status_changed(
                        CampaignRef::GroupBuy(req.group_buy_id),
                        CampaignStatus::SoldOut,
                    );
                }
                self.publish_group(req.group_buy_id, &admission.group_no).await;
                Ok(admission)
            }
            Err(e) => Err(log_rejection(
                &format!("member {} group buy {}", req.member_id, req.group_buy_id),
                e,
            )),
        }
    }

    /// 秒杀订单支付确认；重复确认返回 false
    pub async fn confirm_seckill_payment(&self, seckill_order_id: i64) -> AppResult<bool> {
        let marked = retry_on_conflict(&self.retry, "seckill payment", || {
            self.repo.mark_seckill_paid(seckill_order_id, Utc::now())
        })
        .await?;
        if marked {
            log::info!("Seckill order {seckill_order_id} paid");
        } else {
            log::debug!("Seckill order {seckill_order_id} was not pending, payment ignored");
        }
        Ok(marked)
    }

    /// 取消未支付的秒杀订单并释放库存；已不是 pending 时返回 None
    pub async fn cancel_seckill_order(&self, seckill_order_id: i64) -> AppResult<Option<ReleasedStock>> {
        self.cancel_at(seckill_order_id, Utc::now()).await
    }

    async fn cancel_at(
        &self,
        seckill_order_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<ReleasedStock>> {
        let released = retry_on_conflict(&self.retry, "seckill cancel", || {
            self.repo.cancel_seckill_order(seckill_order_id, now)
        })
        .await?;
        if let Some(released) = &released {
            log::info!("Seckill order {seckill_order_id} cancelled");
            self.ledger.record_release(released);
            if released.reopened {
                if let Some(owner) = self.ledger.owner_of(released.unit).await? {
                    self.events.status_changed(owner, CampaignStatus::Active);
                }
            }
        }
        Ok(released)
    }

    /// 支付超时扫描：取消 `created_at < now - payment_timeout` 的 pending 订单
    pub async fn sweep_payment_timeouts(
        &self,
        now: DateTime<Utc>,
        payment_timeout: chrono::Duration,
    ) -> AppResult<ReleaseSweepReport> {
        let overdue = self
            .repo
            .list_unpaid_seckill_orders(now - payment_timeout)
            .await?;
        let mut report = ReleaseSweepReport::default();
        for id in overdue {
            match self.cancel_at(id, now).await {
                Ok(Some(released)) => {
                    report.resolved += 1;
                    report.released_quantity += released.released as i64;
                }
                // 已被支付或被其他 worker 取消
                Ok(None) => {}
                Err(e) => log::error!("Failed to cancel overdue seckill order {id}: {e}"),
            }
        }
        Ok(report)
    }

    async fn publish_group(&self, group_buy_id: i64, group_no: &str) {
        match self.repo.list_group_members(group_no).await {
            Ok(members) => self.events.publish(DomainEvent::GroupChanged {
                group_buy_id,
                group_no: group_no.to_string(),
                members: members.len() as i32,
                resolved: members.iter().any(|m| !m.status.is_open()),
            }),
            Err(e) => log::warn!("Failed to read members of group {group_no}: {e}"),
        }
    }
}

fn validate_quantity(qty: i32) -> AppResult<()> {
    if qty <= 0 {
        return Err(AppError::ValidationError("Quantity must be positive".into()));
    }
    Ok(())
}

/// 业务拒绝记 debug，系统失败记 warn；原样返回错误
fn log_rejection(what: &str, e: AppError) -> AppError {
    if e.is_rejection() {
        log::debug!("Admission rejected for {what}: {e}");
    } else {
        log::warn!("Admission failed for {what}: {e}");
    }
    e
}
