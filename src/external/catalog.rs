//! 商品目录（外部协作方）只读查询
//!
//! 仅用于展示与价格快照组装，活动库存判断从不依赖这里的 stock。

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::events::{DomainEvent, EventPublisher};
use crate::models::ProductSnapshot;

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn find_product(&self, product_id: i64) -> AppResult<Option<ProductSnapshot>>;
}

/// 内存目录（开发 / 测试）
///
/// 带发布端时，每次变更都以商品事件投递，与外部目录推送的事件一致。
#[derive(Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<i64, ProductSnapshot>>,
    events: Option<EventPublisher>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: EventPublisher) -> Self {
        Self {
            products: RwLock::default(),
            events: Some(events),
        }
    }

    pub async fn upsert(&self, product: ProductSnapshot) {
        let previous = self
            .products
            .write()
            .await
            .insert(product.product_id, product.clone());
        if let Some(events) = &self.events {
            events.publish(match previous {
                Some(_) => DomainEvent::ProductUpdated(product),
                None => DomainEvent::ProductCreated(product),
            });
        }
    }

    pub async fn remove(&self, product_id: i64) {
        let removed = self.products.write().await.remove(&product_id);
        if let (Some(_), Some(events)) = (removed, &self.events) {
            events.publish(DomainEvent::ProductDeleted { product_id });
        }
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn find_product(&self, product_id: i64) -> AppResult<Option<ProductSnapshot>> {
        Ok(self.products.read().await.get(&product_id).cloned())
    }
}
