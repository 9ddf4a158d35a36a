use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::entities::{
    CampaignCommand, CampaignStatus, activity_entity, group_buy_entity, seckill_product_entity,
    seckill_session_entity,
};
use crate::error::{AppError, AppResult};
use crate::events::EventPublisher;
use crate::external::CatalogClient;
use crate::models::*;
use crate::repositories::PromotionRepository;
use crate::services::StockLedger;

/// 条件写入被并发修改抢先时的重读次数
const TRANSITION_ATTEMPTS: usize = 3;

/// 活动生命周期：管理端指令 + 时间驱动的定时推进
#[derive(Clone)]
pub struct CampaignService {
    repo: Arc<dyn PromotionRepository>,
    catalog: Arc<dyn CatalogClient>,
    ledger: StockLedger,
    events: EventPublisher,
}

impl CampaignService {
    pub fn new(
        repo: Arc<dyn PromotionRepository>,
        catalog: Arc<dyn CatalogClient>,
        events: EventPublisher,
    ) -> Self {
        let ledger = StockLedger::new(repo.clone(), events.clone());
        Self {
            repo,
            catalog,
            ledger,
            events,
        }
    }

    // -----------------------------
    // 创建
    // -----------------------------

    pub async fn create_activity(&self, new: NewActivity) -> AppResult<activity_entity::Model> {
        if new.title.trim().is_empty() {
            return Err(AppError::ValidationError("Activity title is required".into()));
        }
        let activity = self.repo.create_activity(&new, Utc::now()).await?;
        log::info!("Seckill activity {} created: {}", activity.id, activity.title);
        Ok(activity)
    }

    pub async fn create_session(&self, new: NewSession) -> AppResult<seckill_session_entity::Model> {
        validate_window(new.start_time, new.end_time)?;
        if new.max_quantity_per_user < 0 {
            return Err(AppError::ValidationError(
                "Session purchase limit cannot be negative".into(),
            ));
        }
        let session = self.repo.create_session(&new, Utc::now()).await?;
        log::info!(
            "Seckill session {} created for activity {} ({} ~ {})",
            session.id,
            session.activity_id,
            session.start_time,
            session.end_time
        );
        Ok(session)
    }

    /// 原价未指定时取 SKU 当前价格；SKU 必须属于该商品
    pub async fn create_seckill_product(
        &self,
        new: NewSeckillProduct,
    ) -> AppResult<seckill_product_entity::Model> {
        if new.quantity < 0 || new.max_quantity_per_user < 0 {
            return Err(AppError::ValidationError(
                "Quantity and purchase limit cannot be negative".into(),
            ));
        }
        if new.seckill_price < 0 {
            return Err(AppError::ValidationError("Seckill price cannot be negative".into()));
        }
        let original_price = match new.original_price {
            Some(price) => price,
            None => self.sku_price(new.product_id, new.product_sku_id).await?,
        };

        let product = self
            .repo
            .create_seckill_product(&new, original_price, Utc::now())
            .await?;
        self.events.stock_changed(
            StockUnit::SeckillProduct(product.id),
            product.quantity,
            product.sold_quantity,
        );
        Ok(product)
    }

    pub async fn create_group_buy(&self, new: NewGroupBuy) -> AppResult<group_buy_entity::Model> {
        validate_window(new.start_time, new.end_time)?;
        if new.min_people < 2 {
            return Err(AppError::ValidationError(
                "A group needs at least 2 people".into(),
            ));
        }
        if new.max_people != 0 && new.max_people < new.min_people {
            return Err(AppError::ValidationError(
                "max_people must be 0 (unlimited) or at least min_people".into(),
            ));
        }
        if new.expire_hours <= 0 {
            return Err(AppError::ValidationError("expire_hours must be positive".into()));
        }
        if new.total_quantity < 0 || new.max_quantity_per_user < 0 || new.group_price < 0 {
            return Err(AppError::ValidationError(
                "Quantities and prices cannot be negative".into(),
            ));
        }
        let original_price = match new.original_price {
            Some(price) => price,
            None => self.sku_price(new.product_id, new.sku_id).await?,
        };

        let group_buy = self
            .repo
            .create_group_buy(&new, original_price, Utc::now())
            .await?;
        log::info!("Group buy {} created: {}", group_buy.id, group_buy.title);
        self.events.stock_changed(
            StockUnit::GroupBuy(group_buy.id),
            group_buy.total_quantity,
            group_buy.sold_quantity,
        );
        Ok(group_buy)
    }

    async fn sku_price(&self, product_id: i64, sku_id: i64) -> AppResult<i64> {
        self.catalog
            .find_product(product_id)
            .await?
            .and_then(|p| p.skus.into_iter().find(|s| s.sku_id == sku_id))
            .map(|sku| sku.price)
            .ok_or_else(|| AppError::NotFound(format!("SKU {sku_id} of product {product_id}")))
    }

    // -----------------------------
    // 状态机指令
    // -----------------------------

    pub async fn start(&self, campaign: CampaignRef) -> AppResult<CampaignStatus> {
        self.command(campaign, CampaignCommand::Start).await
    }

    pub async fn end(&self, campaign: CampaignRef) -> AppResult<CampaignStatus> {
        self.command(campaign, CampaignCommand::End).await
    }

    pub async fn cancel(&self, campaign: CampaignRef) -> AppResult<CampaignStatus> {
        self.command(campaign, CampaignCommand::Cancel).await
    }

    /// 读取 -> 状态机判定 -> 条件写入；条件失败说明被并发修改，重读后再判定。
    /// 非法迁移以 `InvalidTransition` 返回，状态保持不变。
    pub async fn command(
        &self,
        campaign: CampaignRef,
        command: CampaignCommand,
    ) -> AppResult<CampaignStatus> {
        for _ in 0..TRANSITION_ATTEMPTS {
            let current = self
                .repo
                .campaign_status(campaign)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{campaign}")))?;
            let next = current.apply(command).map_err(|e| {
                log::warn!("Rejected {command} on {campaign}: {e}");
                AppError::from(e)
            })?;
            if self
                .repo
                .transition_status(campaign, &[current], next, Utc::now())
                .await?
            {
                log::info!("{campaign}: {current} -> {next} ({command})");
                self.events.status_changed(campaign, next);
                return Ok(next);
            }
            log::debug!("{campaign} changed concurrently during {command}, re-reading");
        }
        Err(AppError::PersistenceConflict(format!(
            "{campaign} kept changing during {command}"
        )))
    }

    /// 管理端开关；关闭后立即拒绝新的准入
    pub async fn set_enabled(&self, campaign: CampaignRef, enabled: bool) -> AppResult<()> {
        if !self.repo.set_enabled(campaign, enabled, Utc::now()).await? {
            return Err(AppError::NotFound(format!("{campaign}")));
        }
        log::info!(
            "{campaign} {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub async fn adjust_quantity(&self, unit: StockUnit, quantity: i32) -> AppResult<StockSnapshot> {
        if quantity < 0 {
            return Err(AppError::ValidationError("Quantity cannot be negative".into()));
        }
        self.ledger.adjust(unit, quantity).await
    }

    // -----------------------------
    // 定时推进
    // -----------------------------

    /// 到点开始 / 结束。每一步都是条件写入，多个 worker 同时执行时
    /// 只有一个会真正写入，其余计为 skipped。
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let candidates = self.repo.sweep_candidates(now).await?;
        let mut report = SweepReport::default();

        for campaign in candidates.to_start {
            let started = self
                .repo
                .transition_status(campaign, &[CampaignStatus::Pending], CampaignStatus::Active, now)
                .await?;
            if started {
                log::info!("{campaign} started by schedule");
                self.events.status_changed(campaign, CampaignStatus::Active);
                report.started += 1;
            } else {
                report.skipped += 1;
            }
        }

        for campaign in candidates.to_end {
            let ended = self
                .repo
                .transition_status(
                    campaign,
                    &[
                        CampaignStatus::Pending,
                        CampaignStatus::Active,
                        CampaignStatus::SoldOut,
                    ],
                    CampaignStatus::Ended,
                    now,
                )
                .await?;
            if ended {
                log::info!("{campaign} ended by schedule");
                self.events.status_changed(campaign, CampaignStatus::Ended);
                report.ended += 1;
            } else {
                report.skipped += 1;
            }
        }

        Ok(report)
    }

    // -----------------------------
    // 前台展示
    // -----------------------------

    pub async fn session_display(&self, session_id: i64, now: DateTime<Utc>) -> AppResult<DisplayStatus> {
        let session = self
            .repo
            .find_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        Ok(session_display_status(&session, now))
    }

    pub async fn group_buy_display(
        &self,
        group_buy_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DisplayStatus> {
        let group_buy = self
            .repo
            .find_group_buy(group_buy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("group buy {group_buy_id}")))?;
        Ok(group_buy_display_status(&group_buy, now))
    }
}

fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if start >= end {
        return Err(AppError::ValidationError(
            "start_time must be before end_time".into(),
        ));
    }
    Ok(())
}
