use std::sync::Arc;

use chrono::Utc;

use crate::entities::CampaignStatus;
use crate::error::AppResult;
use crate::events::EventPublisher;
use crate::models::{CampaignRef, ReleasedStock, Reservation, StockSnapshot, StockUnit};
use crate::repositories::PromotionRepository;

/// 库存账本
///
/// 权威计数只存在于仓储中，这里不缓存任何 sold_quantity；
/// 每次计数变化后向缓存同步层投递事件，投递不影响调用结果。
#[derive(Clone)]
pub struct StockLedger {
    repo: Arc<dyn PromotionRepository>,
    events: EventPublisher,
}

impl StockLedger {
    pub fn new(repo: Arc<dyn PromotionRepository>, events: EventPublisher) -> Self {
        Self { repo, events }
    }

    pub async fn reserve(&self, unit: StockUnit, qty: i32) -> AppResult<Reservation> {
        let reservation = self.repo.reserve_stock(unit, qty, Utc::now()).await?;
        self.record_reservation(&reservation);
        if reservation.is_exhausted() {
            self.publish_owner_status(unit).await;
        }
        Ok(reservation)
    }

    /// 补偿释放（下游失败、支付超时、拼团失败）
    pub async fn release(&self, unit: StockUnit, qty: i32) -> AppResult<ReleasedStock> {
        let released = self.repo.release_stock(unit, qty, Utc::now()).await?;
        self.record_release(&released);
        if released.reopened {
            self.publish_owner_status(unit).await;
        }
        Ok(released)
    }

    /// 管理员修正分配库存
    pub async fn adjust(&self, unit: StockUnit, quantity: i32) -> AppResult<StockSnapshot> {
        let snapshot = self.repo.adjust_quantity(unit, quantity, Utc::now()).await?;
        log::info!(
            "Stock of {unit} adjusted to {} (sold {})",
            snapshot.quantity,
            snapshot.sold_quantity
        );
        self.events
            .stock_changed(unit, snapshot.quantity, snapshot.sold_quantity);
        self.publish_owner_status(unit).await;
        Ok(snapshot)
    }

    pub fn record_reservation(&self, reservation: &Reservation) {
        self.events.stock_changed(
            reservation.unit,
            reservation.quantity,
            reservation.sold_quantity,
        );
    }

    pub fn record_release(&self, released: &ReleasedStock) {
        if released.released > 0 {
            log::info!(
                "Released {} unit(s) of {}, sold now {}/{}",
                released.released,
                released.unit,
                released.sold_quantity,
                released.quantity
            );
        }
        self.events
            .stock_changed(released.unit, released.quantity, released.sold_quantity);
    }

    /// 库存单元所属的、受状态机管理的实体
    pub async fn owner_of(&self, unit: StockUnit) -> AppResult<Option<CampaignRef>> {
        Ok(match unit {
            StockUnit::GroupBuy(id) => Some(CampaignRef::GroupBuy(id)),
            StockUnit::SeckillProduct(id) => self
                .repo
                .find_seckill_product(id)
                .await?
                .map(|p| CampaignRef::Session(p.session_id)),
        })
    }

    /// 重新读取所属实体的持久化状态并投递（售罄 / 恢复）
    async fn publish_owner_status(&self, unit: StockUnit) {
        let lookup = async {
            let Some(owner) = self.owner_of(unit).await? else {
                return Ok::<_, crate::error::AppError>(None);
            };
            Ok(self
                .repo
                .campaign_status(owner)
                .await?
                .map(|status| (owner, status)))
        };
        match lookup.await {
            Ok(Some((owner, status))) => {
                if status == CampaignStatus::SoldOut {
                    log::info!("{owner} is sold out");
                }
                self.events.status_changed(owner, status);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Failed to read owner status of {unit}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::events::{DomainEvent, EventReceiver};
    use crate::external::MemoryCatalog;
    use crate::models::NewGroupBuy;
    use crate::repositories::MemoryPromotionRepository;
    use crate::services::CampaignService;
    use chrono::Duration;

    async fn live_group_buy(
        total: i32,
    ) -> (StockLedger, Arc<dyn PromotionRepository>, i64, EventReceiver) {
        let repo: Arc<dyn PromotionRepository> = Arc::new(MemoryPromotionRepository::new());
        let (events, rx) = EventPublisher::channel();
        let campaigns =
            CampaignService::new(repo.clone(), Arc::new(MemoryCatalog::new()), events.clone());
        let now = Utc::now();
        let gb = campaigns
            .create_group_buy(NewGroupBuy {
                title: "2 人团".into(),
                product_id: 1,
                sku_id: 11,
                original_price: Some(1500),
                group_price: 900,
                min_people: 2,
                max_people: 0,
                max_quantity_per_user: 0,
                expire_hours: 24,
                total_quantity: total,
                start_time: now - Duration::minutes(1),
                end_time: now + Duration::days(1),
            })
            .await
            .unwrap();
        campaigns.start(CampaignRef::GroupBuy(gb.id)).await.unwrap();
        (StockLedger::new(repo.clone(), events), repo, gb.id, rx)
    }

    fn statuses(rx: &mut EventReceiver) -> Vec<CampaignStatus> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::CampaignStatusChanged { status, .. } = event {
                out.push(status);
            }
        }
        out
    }

    #[tokio::test]
    async fn reserve_exhausts_then_release_reopens() {
        let (ledger, repo, id, mut rx) = live_group_buy(3).await;
        let unit = StockUnit::GroupBuy(id);
        let owner = CampaignRef::GroupBuy(id);
        statuses(&mut rx);

        let first = ledger.reserve(unit, 2).await.unwrap();
        assert_eq!(first.sold_quantity, 2);
        assert!(!first.is_exhausted());

        assert!(matches!(
            ledger.reserve(unit, 2).await,
            Err(AppError::InsufficientStock { .. })
        ));

        let last = ledger.reserve(unit, 1).await.unwrap();
        assert!(last.is_exhausted());
        assert_eq!(statuses(&mut rx), vec![CampaignStatus::SoldOut]);
        assert_eq!(
            repo.campaign_status(owner).await.unwrap(),
            Some(CampaignStatus::SoldOut)
        );

        let released = ledger.release(unit, 2).await.unwrap();
        assert!(released.reopened);
        assert_eq!(released.sold_quantity, 1);
        assert_eq!(statuses(&mut rx), vec![CampaignStatus::Active]);
    }

    #[tokio::test]
    async fn owner_of_resolves_campaign_for_unit() {
        let (ledger, _, id, _) = live_group_buy(1).await;
        assert_eq!(
            ledger.owner_of(StockUnit::GroupBuy(id)).await.unwrap(),
            Some(CampaignRef::GroupBuy(id))
        );
        assert_eq!(
            ledger
                .owner_of(StockUnit::SeckillProduct(9_999))
                .await
                .unwrap(),
            None
        );
    }
}
