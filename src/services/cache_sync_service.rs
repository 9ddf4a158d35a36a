//! 缓存同步层
//!
//! 从事件通道消费领域事件，把库存 / 状态 / 商品信息写入只读展示缓存。
//! 最终一致；准入链路从不读取这里写入的任何 key。
//!
//! 库存、状态、团事件只作为触发信号：并发事务提交后的投递顺序不确定，
//! 事件里携带的计数可能早于已提交的最新值，所以每次都从仓储重新读取
//! 权威行再写入。最后处理的事件总能读到最后一次提交，缓存因此收敛。
//!
//! Key 布局（`{p}` 为配置的前缀）：
//! - `{p}:stock:{unit}`             hash: quantity / sold / remaining
//! - `{p}:status:{campaign}`        string: 持久化状态
//! - `{p}:group:{group_no}`         hash: group_buy_id / members / resolved
//! - `{p}:product:{id}`             string: 商品展示 JSON
//! - `{p}:product:{id}:sku_stock`   hash: sku_id -> 普通库存

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entities::CampaignStatus;
use crate::error::AppResult;
use crate::events::{DomainEvent, EventReceiver};
use crate::external::{Cache, Notifier};
use crate::models::{CampaignRef, ProductSnapshot, StockUnit, StockWarning};
use crate::repositories::PromotionRepository;

/// 缓存中的库存展示值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockView {
    pub quantity: i32,
    pub sold_quantity: i32,
    pub remaining: i32,
}

#[derive(Clone)]
pub struct CacheSyncService {
    cache: Arc<dyn Cache>,
    repo: Arc<dyn PromotionRepository>,
    notifier: Arc<dyn Notifier>,
    prefix: String,
    warning_threshold: i64,
}

impl CacheSyncService {
    pub fn new(
        cache: Arc<dyn Cache>,
        repo: Arc<dyn PromotionRepository>,
        notifier: Arc<dyn Notifier>,
        prefix: impl Into<String>,
        warning_threshold: i64,
    ) -> Self {
        Self {
            cache,
            repo,
            notifier,
            prefix: prefix.into(),
            warning_threshold,
        }
    }

    /// 消费循环；所有发布端关闭后退出
    pub async fn run(self, mut rx: EventReceiver) {
        log::info!("Cache sync consumer started (prefix {})", self.prefix);
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle(&event).await {
                // 缓存只是展示用，失败不回传给产生事件的一方
                log::warn!("Cache sync failed for {event:?}: {e}");
            }
        }
        log::info!("Cache sync consumer stopped");
    }

    pub async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        match event {
            DomainEvent::StockChanged { unit, .. } => self.refresh_stock(*unit).await,
            DomainEvent::CampaignStatusChanged { campaign, .. } => {
                self.refresh_status(*campaign).await
            }
            DomainEvent::GroupChanged {
                group_buy_id,
                group_no,
                ..
            } => self.refresh_group(*group_buy_id, group_no).await,
            DomainEvent::ProductCreated(product) | DomainEvent::ProductUpdated(product) => {
                self.sync_product(product).await
            }
            DomainEvent::ProductDeleted { product_id } => self.remove_product(*product_id).await,
        }
    }

    /// 前台读取库存展示值
    pub async fn stock_view(&self, unit: StockUnit) -> AppResult<Option<StockView>> {
        let fields = self.cache.hgetall(&self.stock_key(unit)).await?;
        let field = |name: &str| fields.get(name).and_then(|v| v.parse::<i32>().ok());
        Ok(match (field("quantity"), field("sold"), field("remaining")) {
            (Some(quantity), Some(sold_quantity), Some(remaining)) => Some(StockView {
                quantity,
                sold_quantity,
                remaining,
            }),
            _ => None,
        })
    }

    /// 无法识别的缓存值按缺失处理
    pub async fn status_view(&self, campaign: CampaignRef) -> AppResult<Option<CampaignStatus>> {
        let cached = self.cache.get(&self.status_key(campaign)).await?;
        Ok(cached.as_deref().and_then(parse_cached_status))
    }

    // -----------------------------
    // 内部
    // -----------------------------

    fn stock_key(&self, unit: StockUnit) -> String {
        format!("{}:stock:{unit}", self.prefix)
    }

    fn status_key(&self, campaign: CampaignRef) -> String {
        format!("{}:status:{campaign}", self.prefix)
    }

    fn group_key(&self, group_no: &str) -> String {
        format!("{}:group:{group_no}", self.prefix)
    }

    fn product_key(&self, product_id: i64) -> String {
        format!("{}:product:{product_id}", self.prefix)
    }

    fn sku_stock_key(&self, product_id: i64) -> String {
        format!("{}:product:{product_id}:sku_stock", self.prefix)
    }

    async fn refresh_stock(&self, unit: StockUnit) -> AppResult<()> {
        let current = match unit {
            StockUnit::SeckillProduct(id) => self
                .repo
                .find_seckill_product(id)
                .await?
                .map(|p| (p.quantity, p.sold_quantity)),
            StockUnit::GroupBuy(id) => self
                .repo
                .find_group_buy(id)
                .await?
                .map(|g| (g.total_quantity, g.sold_quantity)),
        };
        match current {
            Some((quantity, sold)) => self.write_stock(unit, quantity, sold).await,
            None => self.cache.delete(&self.stock_key(unit)).await,
        }
    }

    async fn refresh_status(&self, campaign: CampaignRef) -> AppResult<()> {
        let key = self.status_key(campaign);
        match self.repo.campaign_status(campaign).await? {
            Some(status) => self.cache.set(&key, &status.to_string()).await,
            None => self.cache.delete(&key).await,
        }
    }

    async fn refresh_group(&self, group_buy_id: i64, group_no: &str) -> AppResult<()> {
        let key = self.group_key(group_no);
        let members = self.repo.list_group_members(group_no).await?;
        if members.is_empty() {
            return self.cache.delete(&key).await;
        }
        let resolved = members.iter().any(|m| !m.status.is_open());
        self.cache
            .hset(&key, "group_buy_id", &group_buy_id.to_string())
            .await?;
        self.cache
            .hset(&key, "members", &members.len().to_string())
            .await?;
        self.cache
            .hset(&key, "resolved", &resolved.to_string())
            .await
    }

    async fn write_stock(&self, unit: StockUnit, quantity: i32, sold: i32) -> AppResult<()> {
        let key = self.stock_key(unit);
        self.cache.hset(&key, "quantity", &quantity.to_string()).await?;
        self.cache.hset(&key, "sold", &sold.to_string()).await?;
        self.cache
            .hset(&key, "remaining", &(quantity - sold).max(0).to_string())
            .await
    }

    /// 商品新建 / 更新：刷新展示信息、SKU 普通库存，清理已删除 SKU，
    /// 并从仓储重建该商品下所有活动库存单元
    async fn sync_product(&self, product: &ProductSnapshot) -> AppResult<()> {
        let product_id = product.product_id;
        self.cache
            .set(&self.product_key(product_id), &serde_json::to_string(product)?)
            .await?;

        let sku_key = self.sku_stock_key(product_id);
        let previous: HashMap<String, String> = self.cache.hgetall(&sku_key).await?;
        let current: HashSet<String> = product.skus.iter().map(|s| s.sku_id.to_string()).collect();

        for stale in previous.keys().filter(|k| !current.contains(*k)) {
            log::debug!("SKU {stale} removed from product {product_id}, dropping cached stock");
            self.cache.hdel(&sku_key, stale).await?;
        }

        for sku in &product.skus {
            let field = sku.sku_id.to_string();
            self.cache.hset(&sku_key, &field, &sku.stock.to_string()).await?;

            let before = previous.get(&field).and_then(|v| v.parse::<i64>().ok());
            if self.crossed_threshold(before, sku.stock) {
                let warning = StockWarning {
                    product_id,
                    product_name: product.name.clone(),
                    sku_id: sku.sku_id,
                    stock: sku.stock,
                    threshold: self.warning_threshold,
                };
                if let Err(e) = self.notifier.stock_warning(&warning).await {
                    log::error!("Failed to send stock warning for sku {}: {e}", sku.sku_id);
                }
            }
        }

        let live_skus: HashSet<i64> = product.skus.iter().map(|s| s.sku_id).collect();
        for unit in self.repo.list_stock_units_for_product(product_id).await? {
            if live_skus.contains(&unit.sku_id) {
                self.write_stock(unit.unit, unit.quantity, unit.sold_quantity)
                    .await?;
            } else {
                self.cache.delete(&self.stock_key(unit.unit)).await?;
            }
        }
        Ok(())
    }

    async fn remove_product(&self, product_id: i64) -> AppResult<()> {
        self.cache.delete(&self.product_key(product_id)).await?;
        self.cache.delete(&self.sku_stock_key(product_id)).await?;
        for unit in self.repo.list_stock_units_for_product(product_id).await? {
            self.cache.delete(&self.stock_key(unit.unit)).await?;
        }
        log::info!("Cache entries of product {product_id} removed");
        Ok(())
    }

    /// 从阈值之上（或未知）降到阈值及以下才预警，持续低库存不重复通知
    fn crossed_threshold(&self, before: Option<i64>, after: i64) -> bool {
        after <= self.warning_threshold && before.is_none_or(|b| b > self.warning_threshold)
    }
}

fn parse_cached_status(value: &str) -> Option<CampaignStatus> {
    match value {
        "pending" => Some(CampaignStatus::Pending),
        "active" => Some(CampaignStatus::Active),
        "ended" => Some(CampaignStatus::Ended),
        "cancelled" => Some(CampaignStatus::Cancelled),
        "sold_out" => Some(CampaignStatus::SoldOut),
        _ => None,
    }
}
