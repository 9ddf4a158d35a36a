//! 领域事件与投递通道
//!
//! 产生事件的一方只负责 `publish`，不会等待消费方；缓存同步层从
//! [`EventReceiver`] 中异步消费，与产生事件的事务完全解耦。

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::entities::CampaignStatus;
use crate::models::{CampaignRef, ProductSnapshot, StockUnit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// 活动库存计数变化（预留 / 释放 / 管理员修正）
    ///
    /// 计数是发布那一刻读到的值，并发下可能乱序到达；消费方以仓储为准。
    StockChanged {
        unit: StockUnit,
        quantity: i32,
        sold_quantity: i32,
    },
    CampaignStatusChanged {
        campaign: CampaignRef,
        status: CampaignStatus,
    },
    /// 团人数变化（展示用）
    GroupChanged {
        group_buy_id: i64,
        group_no: String,
        members: i32,
        resolved: bool,
    },
    ProductCreated(ProductSnapshot),
    ProductUpdated(ProductSnapshot),
    ProductDeleted {
        product_id: i64,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<DomainEvent>;

/// 事件发布端，可廉价 clone
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventPublisher {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// 非阻塞投递；消费端已关闭时只记录日志
    pub fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.tx.send(event) {
            log::warn!("Cache sync consumer is gone, dropping event: {:?}", e.0);
        }
    }

    pub fn stock_changed(&self, unit: StockUnit, quantity: i32, sold_quantity: i32) {
        self.publish(DomainEvent::StockChanged {
            unit,
            quantity,
            sold_quantity,
        });
    }

    pub fn status_changed(&self, campaign: CampaignRef, status: CampaignStatus) {
        self.publish(DomainEvent::CampaignStatusChanged { campaign, status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_is_fire_and_forget() {
        let (publisher, mut rx) = EventPublisher::channel();
        publisher.stock_changed(StockUnit::GroupBuy(7), 10, 4);
        assert_eq!(
            rx.recv().await,
            Some(DomainEvent::StockChanged {
                unit: StockUnit::GroupBuy(7),
                quantity: 10,
                sold_quantity: 4,
            })
        );

        drop(rx);
        // 消费端关闭后发布不会 panic
        publisher.status_changed(CampaignRef::Session(1), CampaignStatus::Ended);
    }
}
