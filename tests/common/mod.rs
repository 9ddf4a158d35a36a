//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use seckill_backend::AppResult;
use seckill_backend::entities::{group_buy_entity, seckill_product_entity, seckill_session_entity};
use seckill_backend::events::{EventPublisher, EventReceiver};
use seckill_backend::external::{MemoryCatalog, Notifier};
use seckill_backend::models::*;
use seckill_backend::repositories::{MemoryPromotionRepository, PromotionRepository};
use seckill_backend::services::{AdmissionService, CampaignService, GroupBuyService};
use seckill_backend::utils::RetryPolicy;

/// Notifier that keeps every call for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub warnings: Mutex<Vec<StockWarning>>,
    pub successes: Mutex<Vec<(String, Vec<i64>)>>,
    pub refunds: Mutex<Vec<RefundRequest>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn stock_warning(&self, warning: &StockWarning) -> AppResult<()> {
        self.warnings.lock().unwrap().push(warning.clone());
        Ok(())
    }

    async fn group_succeeded(&self, group_no: &str, member_ids: &[i64]) -> AppResult<()> {
        self.successes
            .lock()
            .unwrap()
            .push((group_no.to_string(), member_ids.to_vec()));
        Ok(())
    }

    async fn refund_required(&self, request: &RefundRequest) -> AppResult<()> {
        self.refunds.lock().unwrap().push(request.clone());
        Ok(())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(StdDuration::from_millis(1))
        .max_delay(StdDuration::from_millis(5))
        .build()
}

pub struct Harness<R = MemoryPromotionRepository> {
    pub repo: Arc<R>,
    pub catalog: Arc<MemoryCatalog>,
    pub notifier: Arc<RecordingNotifier>,
    pub campaigns: CampaignService,
    pub admission: AdmissionService,
    pub groups: GroupBuyService,
    pub events: EventReceiver,
}

pub struct SeckillFixture {
    pub activity_id: i64,
    pub session: seckill_session_entity::Model,
    pub product: seckill_product_entity::Model,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_repo(Arc::new(MemoryPromotionRepository::new()))
    }
}

impl<R: PromotionRepository + 'static> Harness<R> {
    pub fn with_repo(repo: Arc<R>) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let (publisher, events) = EventPublisher::channel();
        let catalog = Arc::new(MemoryCatalog::with_events(publisher.clone()));

        let campaigns = CampaignService::new(repo.clone(), catalog.clone(), publisher.clone());
        let admission = AdmissionService::new(
            repo.clone(),
            publisher.clone(),
            fast_retry(),
            StdDuration::from_secs(5),
        );
        let groups = GroupBuyService::new(repo.clone(), notifier.clone(), publisher, fast_retry());

        Self {
            repo,
            catalog,
            notifier,
            campaigns,
            admission,
            groups,
            events,
        }
    }

    /// Active activity + active session holding one seckill product.
    pub async fn live_seckill(
        &self,
        quantity: i32,
        product_limit: i32,
        session_limit: i32,
    ) -> SeckillFixture {
        let fixture = self
            .pending_seckill(quantity, product_limit, session_limit)
            .await;
        self.campaigns
            .start(CampaignRef::Activity(fixture.activity_id))
            .await
            .unwrap();
        self.campaigns
            .start(CampaignRef::Session(fixture.session.id))
            .await
            .unwrap();
        fixture
    }

    pub async fn pending_seckill(
        &self,
        quantity: i32,
        product_limit: i32,
        session_limit: i32,
    ) -> SeckillFixture {
        let now = Utc::now();
        let activity = self
            .campaigns
            .create_activity(NewActivity {
                title: "Flash sale".into(),
                rules: None,
            })
            .await
            .unwrap();
        let session = self
            .campaigns
            .create_session(NewSession {
                activity_id: activity.id,
                start_time: now - Duration::minutes(1),
                end_time: now + Duration::hours(1),
                max_quantity_per_user: session_limit,
            })
            .await
            .unwrap();
        let product = self
            .campaigns
            .create_seckill_product(NewSeckillProduct {
                session_id: session.id,
                product_id: 100,
                product_sku_id: 1001,
                original_price: Some(2000),
                seckill_price: 990,
                quantity,
                max_quantity_per_user: product_limit,
            })
            .await
            .unwrap();
        SeckillFixture {
            activity_id: activity.id,
            session,
            product,
        }
    }

    /// Started group buy without a per-buyer limit.
    pub async fn live_group_buy(
        &self,
        min_people: i32,
        max_people: i32,
        total_quantity: i32,
    ) -> group_buy_entity::Model {
        let now = Utc::now();
        let group_buy = self
            .campaigns
            .create_group_buy(NewGroupBuy {
                title: "Group tea".into(),
                product_id: 200,
                sku_id: 2001,
                original_price: Some(1500),
                group_price: 900,
                min_people,
                max_people,
                max_quantity_per_user: 0,
                expire_hours: 24,
                total_quantity,
                start_time: now - Duration::minutes(1),
                end_time: now + Duration::days(2),
            })
            .await
            .unwrap();
        self.campaigns
            .start(CampaignRef::GroupBuy(group_buy.id))
            .await
            .unwrap();
        group_buy
    }

    pub async fn buy(&self, member_id: i64, seckill_product_id: i64, quantity: i32) -> AppResult<SeckillAdmission> {
        self.admission
            .admit_seckill(SeckillAdmissionRequest {
                member_id,
                seckill_product_id,
                quantity,
            })
            .await
    }

    pub async fn join(
        &self,
        member_id: i64,
        group_buy_id: i64,
        group_no: Option<&str>,
    ) -> AppResult<GroupBuyAdmission> {
        self.admission
            .join_group_buy(GroupBuyJoinRequest {
                member_id,
                group_buy_id,
                group_no: group_no.map(str::to_string),
                quantity: 1,
            })
            .await
    }

    pub async fn sold(&self, unit: StockUnit) -> i32 {
        match unit {
            StockUnit::SeckillProduct(id) => {
                self.repo
                    .find_seckill_product(id)
                    .await
                    .unwrap()
                    .unwrap()
                    .sold_quantity
            }
            StockUnit::GroupBuy(id) => {
                self.repo
                    .find_group_buy(id)
                    .await
                    .unwrap()
                    .unwrap()
                    .sold_quantity
            }
        }
    }
}
