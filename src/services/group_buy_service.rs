//! 成团判定
//!
//! 支付确认：标记 paid -> 统计团内已支付人数 -> 达到 min_people 时整团成团。
//! 成团与失败都在仓储内以拼团活动行锁串行，重复 / 并发确认只会成团一次。

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entities::{CampaignStatus, GroupBuyOrderStatus};
use crate::error::{AppError, AppResult};
use crate::events::{DomainEvent, EventPublisher};
use crate::external::Notifier;
use crate::models::*;
use crate::repositories::PromotionRepository;
use crate::services::StockLedger;
use crate::utils::{RetryPolicy, retry_on_conflict};

#[derive(Clone)]
pub struct GroupBuyService {
    repo: Arc<dyn PromotionRepository>,
    notifier: Arc<dyn Notifier>,
    ledger: StockLedger,
    events: EventPublisher,
    retry: RetryPolicy,
}

impl GroupBuyService {
    pub fn new(
        repo: Arc<dyn PromotionRepository>,
        notifier: Arc<dyn Notifier>,
        events: EventPublisher,
        retry: RetryPolicy,
    ) -> Self {
        let ledger = StockLedger::new(repo.clone(), events.clone());
        Self {
            repo,
            notifier,
            ledger,
            events,
            retry,
        }
    }

    /// 拼团订单支付确认
    ///
    /// 迟到的确认（团已成团 / 失败）记录后返回 `Ignored`，不是错误。
    pub async fn confirm_payment(&self, group_buy_order_id: i64) -> AppResult<GroupPaymentOutcome> {
        match self.try_confirm(group_buy_order_id).await {
            Err(AppError::GroupAlreadyResolved(group_no)) => {
                log::warn!(
                    "Payment for group buy order {group_buy_order_id} arrived after group {group_no} was resolved"
                );
                Ok(GroupPaymentOutcome::Ignored { group_no })
            }
            other => other,
        }
    }

    async fn try_confirm(&self, group_buy_order_id: i64) -> AppResult<GroupPaymentOutcome> {
        let mark = retry_on_conflict(&self.retry, "group payment", || {
            self.repo.mark_group_order_paid(group_buy_order_id, Utc::now())
        })
        .await?;

        let (group_no, group_buy_id) = match mark {
            GroupPaymentMark::Marked {
                group_no,
                group_buy_id,
            } => {
                log::info!("Group buy order {group_buy_order_id} in group {group_no} paid");
                (group_no, group_buy_id)
            }
            // 重复确认照常评估一次，promote_group 自身是幂等的
            GroupPaymentMark::AlreadyPaid {
                group_no,
                group_buy_id,
            } => (group_no, group_buy_id),
            GroupPaymentMark::Resolved { group_no, status } => {
                log::debug!("Group {group_no} already {status}");
                return Err(AppError::GroupAlreadyResolved(group_no));
            }
        };

        self.evaluate(&group_no, group_buy_id, Utc::now()).await
    }

    /// 对一个团做成团判定
    pub async fn evaluate(
        &self,
        group_no: &str,
        group_buy_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<GroupPaymentOutcome> {
        let promotion = retry_on_conflict(&self.retry, "group promotion", || {
            self.repo.promote_group(group_no, now)
        })
        .await?;

        match promotion {
            GroupPromotion::Promoted {
                group_buy_id,
                member_ids,
            } => {
                log::info!(
                    "Group {group_no} of group buy {group_buy_id} succeeded with {} members",
                    member_ids.len()
                );
                self.events.publish(DomainEvent::GroupChanged {
                    group_buy_id,
                    group_no: group_no.to_string(),
                    members: member_ids.len() as i32,
                    resolved: true,
                });
                if let Err(e) = self.notifier.group_succeeded(group_no, &member_ids).await {
                    log::error!("Failed to notify success of group {group_no}: {e}");
                }
                Ok(GroupPaymentOutcome::Grouped {
                    group_no: group_no.to_string(),
                })
            }
            GroupPromotion::Waiting { paid, required } => {
                log::debug!("Group {group_no} of group buy {group_buy_id}: {paid}/{required} paid");
                Ok(GroupPaymentOutcome::Waiting {
                    group_no: group_no.to_string(),
                    paid,
                    required,
                })
            }
            // 并发确认中由另一方完成了成团
            GroupPromotion::AlreadyResolved => {
                let members = self.repo.list_group_members(group_no).await?;
                if members
                    .iter()
                    .any(|m| m.status == GroupBuyOrderStatus::Grouped)
                {
                    Ok(GroupPaymentOutcome::Grouped {
                        group_no: group_no.to_string(),
                    })
                } else {
                    Err(AppError::GroupAlreadyResolved(group_no.to_string()))
                }
            }
        }
    }

    /// 过期扫描：到期未成团的团整体失败、释放库存，已支付成员发起退款
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<ReleaseSweepReport> {
        let expired = self.repo.list_expired_groups(now).await?;
        let mut report = ReleaseSweepReport::default();

        for group_no in expired {
            let failed = match retry_on_conflict(&self.retry, "group expiry", || {
                self.repo.fail_group(&group_no, now)
            })
            .await
            {
                Ok(Some(failed)) => failed,
                // 其他 worker 已处理，或刚好成团
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Failed to expire group {group_no}: {e}");
                    continue;
                }
            };

            log::info!(
                "Group {} of group buy {} expired with {} member(s), released {}",
                failed.group_no,
                failed.group_buy_id,
                failed.members.len(),
                failed.released.released
            );
            report.resolved += 1;
            report.released_quantity += failed.released.released as i64;
            self.ledger.record_release(&failed.released);
            if failed.released.reopened {
                self.events.status_changed(
                    CampaignRef::GroupBuy(failed.group_buy_id),
                    CampaignStatus::Active,
                );
            }
            self.events.publish(DomainEvent::GroupChanged {
                group_buy_id: failed.group_buy_id,
                group_no: failed.group_no.clone(),
                members: failed.members.len() as i32,
                resolved: true,
            });

            for member in failed.members.iter().filter(|m| m.was_paid) {
                let request = RefundRequest {
                    order_id: member.order_id,
                    member_id: member.member_id,
                    amount: member.amount,
                    reason: format!("group {} expired without enough members", failed.group_no),
                };
                match self.notifier.refund_required(&request).await {
                    Ok(()) => report.refunds_requested += 1,
                    Err(e) => log::error!(
                        "Failed to request refund for order {}: {e}",
                        member.order_id
                    ),
                }
            }
        }
        Ok(report)
    }
}
