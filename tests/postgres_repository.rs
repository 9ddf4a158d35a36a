//! Race scenarios against `PgPromotionRepository` on a real Postgres.
//!
//! These tests require Docker to be running and will spin up a `PostgreSQL`
//! container using testcontainers.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

use common::Harness;
use seckill_backend::AppError;
use seckill_backend::config::DatabaseConfig;
use seckill_backend::database::{create_pool, run_migrations};
use seckill_backend::entities::{CampaignStatus, GroupBuyOrderStatus};
use seckill_backend::models::*;
use seckill_backend::repositories::{PgPromotionRepository, PromotionRepository};

/// Postgres container plus a harness wired to the migrated database.
struct TestDb {
    _container: ContainerAsync<Postgres>,
    h: Harness<PgPromotionRepository>,
}

impl TestDb {
    async fn new() -> Self {
        let container = Postgres::default().start().await.unwrap();
        let host = container.get_host().await.unwrap();
        let port = container.get_host_port_ipv4(5432).await.unwrap();

        let config = DatabaseConfig {
            url: format!("postgres://postgres:postgres@{host}:{port}/postgres"),
            max_connections: 20,
        };
        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = PgPromotionRepository::new(pool).with_lock_timeout(StdDuration::from_secs(2));

        Self {
            _container: container,
            h: Harness::with_repo(Arc::new(repo)),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_buyers_never_oversell() {
    let db = TestDb::new().await;
    let h = &db.h;
    let f = h.live_seckill(30, 0, 0).await;

    let racers = (1..=80).map(|member| {
        let admission = h.admission.clone();
        let product_id = f.product.id;
        tokio::spawn(async move {
            admission
                .admit_seckill(SeckillAdmissionRequest {
                    member_id: member,
                    seckill_product_id: product_id,
                    quantity: 1,
                })
                .await
        })
    });
    let results: Vec<_> = join_all(racers)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 30);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        AppError::InsufficientStock { .. } | AppError::CampaignNotPurchasable(_)
    )));
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 30);

    let session = h.repo.find_session(f.session.id).await.unwrap().unwrap();
    assert_eq!(session.sold_quantity, 30);
    assert_eq!(session.status, CampaignStatus::SoldOut);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_buyer_race_respects_product_limit() {
    let db = TestDb::new().await;
    let h = &db.h;
    let f = h.live_seckill(50, 2, 0).await;

    let attempts = (0..10).map(|_| {
        let admission = h.admission.clone();
        let product_id = f.product.id;
        tokio::spawn(async move {
            admission
                .admit_seckill(SeckillAdmissionRequest {
                    member_id: 7,
                    seckill_product_id: product_id,
                    quantity: 1,
                })
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::LimitExceeded { .. }))
    );
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirmations_promote_group_once() {
    let db = TestDb::new().await;
    let h = &db.h;
    let gb = h.live_group_buy(3, 5, 30).await;

    let leader = h.join(1, gb.id, None).await.unwrap();
    let group_no = leader.group_no.clone();
    let second = h.join(2, gb.id, Some(&group_no)).await.unwrap();
    let third = h.join(3, gb.id, Some(&group_no)).await.unwrap();

    // 每个订单确认两次，模拟支付回调重复投递
    let confirmations = [&leader, &second, &third, &leader, &second, &third].map(|a| {
        let groups = h.groups.clone();
        let id = a.group_buy_order_id;
        tokio::spawn(async move { groups.confirm_payment(id).await })
    });
    for outcome in join_all(confirmations).await {
        outcome.unwrap().unwrap();
    }

    assert_eq!(h.notifier.successes.lock().unwrap().len(), 1);
    let members = h.repo.list_group_members(&group_no).await.unwrap();
    assert_eq!(members.len(), 3);
    assert!(
        members
            .iter()
            .all(|m| m.status == GroupBuyOrderStatus::Grouped && m.group_time.is_some())
    );
    let gb = h.repo.find_group_buy(gb.id).await.unwrap().unwrap();
    assert_eq!(gb.group_count, 1);
    assert_eq!(gb.success_group_count, 1);
    assert_eq!(gb.sold_quantity, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_expiry_sweeps_fail_group_once() {
    let db = TestDb::new().await;
    let h = &db.h;
    let gb = h.live_group_buy(3, 0, 10).await;

    let leader = h.join(1, gb.id, None).await.unwrap();
    h.join(2, gb.id, Some(&leader.group_no)).await.unwrap();
    h.groups
        .confirm_payment(leader.group_buy_order_id)
        .await
        .unwrap();

    let later = Utc::now() + Duration::hours(30);
    let sweeps = (0..4).map(|_| {
        let groups = h.groups.clone();
        tokio::spawn(async move { groups.sweep_expired(later).await })
    });
    let reports: Vec<_> = join_all(sweeps)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(reports.iter().map(|r| r.resolved).sum::<usize>(), 1);
    assert_eq!(h.sold(StockUnit::GroupBuy(gb.id)).await, 0);
    assert_eq!(h.notifier.refunds.lock().unwrap().len(), 1);
    let members = h.repo.list_group_members(&leader.group_no).await.unwrap();
    assert!(members.iter().all(|m| m.status == GroupBuyOrderStatus::Failed));

    let again = h.groups.sweep_expired(later).await.unwrap();
    assert_eq!(again.resolved, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn campaign_sweeps_apply_each_transition_once() {
    let db = TestDb::new().await;
    let h = &db.h;
    let f = h.pending_seckill(5, 0, 0).await;
    let now = Utc::now();

    let sweeps = (0..6).map(|_| {
        let campaigns = h.campaigns.clone();
        tokio::spawn(async move { campaigns.run_sweep(now).await })
    });
    let reports: Vec<SweepReport> = join_all(sweeps)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    assert_eq!(reports.iter().map(|r| r.started).sum::<usize>(), 2);
    assert_eq!(h.campaigns.run_sweep(now).await.unwrap().changed(), 0);

    let after_end = now + Duration::hours(2);
    assert_eq!(h.campaigns.run_sweep(after_end).await.unwrap().ended, 2);
    assert_eq!(h.campaigns.run_sweep(after_end).await.unwrap().changed(), 0);
    assert_eq!(
        h.repo
            .campaign_status(CampaignRef::Session(f.session.id))
            .await
            .unwrap(),
        Some(CampaignStatus::Ended)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_sku_is_a_validation_error() {
    let db = TestDb::new().await;
    let h = &db.h;
    let f = h.pending_seckill(5, 0, 0).await;

    let inserts = (0..6).map(|_| {
        let campaigns = h.campaigns.clone();
        let session_id = f.session.id;
        tokio::spawn(async move {
            campaigns
                .create_seckill_product(NewSeckillProduct {
                    session_id,
                    product_id: 100,
                    product_sku_id: 1002,
                    original_price: Some(2000),
                    seckill_price: 990,
                    quantity: 10,
                    max_quantity_per_user: 0,
                })
                .await
        })
    });
    let results: Vec<_> = join_all(inserts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::ValidationError(_)))
    );
    let session = h.repo.find_session(f.session.id).await.unwrap().unwrap();
    assert_eq!(session.total_quantity, 15);
}
