//! Seckill admission: no oversell, purchase limits, atomicity and order lifecycle.

mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures_util::future::join_all;

use common::Harness;
use seckill_backend::AppError;
use seckill_backend::entities::{CampaignStatus, OrderStatus, SeckillOrderStatus};
use seckill_backend::models::*;
use seckill_backend::events::EventPublisher;
use seckill_backend::repositories::PromotionRepository;
use seckill_backend::services::AdmissionService;
use seckill_backend::utils::RetryPolicy;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_racer() {
    let h = Harness::new();
    let f = h.live_seckill(1, 0, 0).await;

    let racers = (1..=2).map(|member| {
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

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_rejection())
    );
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 1);
    assert_eq!(h.repo.seckill_orders().await.len(), 1);
    assert_eq!(h.repo.orders().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn two_hundred_buyers_never_oversell_fifty_units() {
    let h = Harness::new();
    let f = h.live_seckill(50, 0, 0).await;

    let racers = (1..=200).map(|member| {
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

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 50);
    // 售罄后的请求要么库存不足，要么场次已不可购买
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(
                err,
                AppError::InsufficientStock { .. } | AppError::CampaignNotPurchasable(_)
            ),
            "unexpected rejection: {err}"
        );
    }

    let product = h.repo.find_seckill_product(f.product.id).await.unwrap().unwrap();
    assert_eq!(product.sold_quantity, 50);
    assert_eq!(h.repo.seckill_orders().await.len(), 50);

    let session = h.repo.find_session(f.session.id).await.unwrap().unwrap();
    assert_eq!(session.sold_quantity, 50);
    assert_eq!(session.status, CampaignStatus::SoldOut);
}

#[tokio::test]
async fn product_limit_counts_previous_orders() {
    let h = Harness::new();
    let f = h.live_seckill(10, 2, 0).await;

    h.buy(7, f.product.id, 1).await.unwrap();
    h.buy(7, f.product.id, 1).await.unwrap();
    let err = h.buy(7, f.product.id, 1).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::LimitExceeded {
            limit: 2,
            existing: 2,
            requested: 1
        }
    ));

    // 其他买家不受影响
    h.buy(8, f.product.id, 2).await.unwrap();
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_from_one_buyer_respect_limit() {
    let h = Harness::new();
    let f = h.live_seckill(100, 1, 0).await;

    let racers = (0..20).map(|_| {
        let admission = h.admission.clone();
        let product_id = f.product.id;
        tokio::spawn(async move {
            admission
                .admit_seckill(SeckillAdmissionRequest {
                    member_id: 42,
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

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::LimitExceeded { .. }))
    );
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 1);
}

#[tokio::test]
async fn cancelled_orders_do_not_count_toward_limit() {
    let h = Harness::new();
    let f = h.live_seckill(10, 1, 0).await;

    let first = h.buy(5, f.product.id, 1).await.unwrap();
    let released = h
        .admission
        .cancel_seckill_order(first.seckill_order_id)
        .await
        .unwrap()
        .expect("pending order is cancellable");
    assert_eq!(released.released, 1);
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 0);

    h.buy(5, f.product.id, 1).await.unwrap();
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 1);

    // 重复取消是 no-op
    assert_eq!(
        h.admission
            .cancel_seckill_order(first.seckill_order_id)
            .await
            .unwrap(),
        None
    );
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 1);
}

#[tokio::test]
async fn session_limit_spans_products() {
    let h = Harness::new();
    let f = h.pending_seckill(10, 0, 3).await;
    let second = h
        .campaigns
        .create_seckill_product(NewSeckillProduct {
            session_id: f.session.id,
            product_id: 100,
            product_sku_id: 1002,
            original_price: Some(3000),
            seckill_price: 1500,
            quantity: 10,
            max_quantity_per_user: 0,
        })
        .await
        .unwrap();
    h.campaigns
        .start(CampaignRef::Activity(f.activity_id))
        .await
        .unwrap();
    h.campaigns
        .start(CampaignRef::Session(f.session.id))
        .await
        .unwrap();

    let session = h.repo.find_session(f.session.id).await.unwrap().unwrap();
    assert_eq!(session.total_quantity, 20);

    h.buy(9, f.product.id, 2).await.unwrap();
    assert!(matches!(
        h.buy(9, second.id, 2).await,
        Err(AppError::LimitExceeded { limit: 3, .. })
    ));
    h.buy(9, second.id, 1).await.unwrap();
    assert_eq!(h.sold(StockUnit::SeckillProduct(second.id)).await, 1);
}

#[tokio::test]
async fn duplicate_sku_in_session_is_rejected() {
    let h = Harness::new();
    let f = h.pending_seckill(10, 0, 0).await;
    let err = h
        .campaigns
        .create_seckill_product(NewSeckillProduct {
            session_id: f.session.id,
            product_id: 100,
            product_sku_id: 1001,
            original_price: Some(2000),
            seckill_price: 500,
            quantity: 5,
            max_quantity_per_user: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn only_active_enabled_campaigns_admit() {
    let h = Harness::new();
    let f = h.pending_seckill(10, 0, 0).await;

    // 场次尚未开始
    assert!(matches!(
        h.buy(1, f.product.id, 1).await,
        Err(AppError::CampaignNotPurchasable(_))
    ));

    h.campaigns
        .start(CampaignRef::Activity(f.activity_id))
        .await
        .unwrap();
    h.campaigns
        .start(CampaignRef::Session(f.session.id))
        .await
        .unwrap();
    h.buy(1, f.product.id, 1).await.unwrap();

    h.campaigns
        .set_enabled(CampaignRef::Session(f.session.id), false)
        .await
        .unwrap();
    assert!(matches!(
        h.buy(2, f.product.id, 1).await,
        Err(AppError::CampaignNotPurchasable(_))
    ));

    h.campaigns
        .set_enabled(CampaignRef::Session(f.session.id), true)
        .await
        .unwrap();
    h.campaigns
        .end(CampaignRef::Activity(f.activity_id))
        .await
        .unwrap();
    assert!(matches!(
        h.buy(2, f.product.id, 1).await,
        Err(AppError::CampaignNotPurchasable(_))
    ));

    assert!(matches!(
        h.buy(2, 9_999, 1).await,
        Err(AppError::CampaignNotPurchasable(_))
    ));
    assert!(matches!(
        h.buy(2, f.product.id, 0).await,
        Err(AppError::ValidationError(_))
    ));
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 1);
}

#[tokio::test]
async fn order_snapshots_price_at_admission() {
    let h = Harness::new();
    let f = h.live_seckill(10, 0, 0).await;

    let admission = h.buy(3, f.product.id, 3).await.unwrap();
    assert_eq!(admission.unit_price, 990);
    assert_eq!(admission.total_amount, 2970);

    let orders = h.repo.seckill_orders().await;
    let order = orders
        .iter()
        .find(|o| o.id == admission.seckill_order_id)
        .unwrap();
    assert_eq!(order.original_price, 2000);
    assert_eq!(order.seckill_price, 990);
    assert_eq!(order.status, SeckillOrderStatus::Pending);

    let commerce = h.repo.orders().await;
    let commerce = commerce.iter().find(|o| o.id == admission.order_id).unwrap();
    assert_eq!(commerce.total_amount, 2970);
    assert_eq!(commerce.status, OrderStatus::Pending);
}

#[tokio::test]
async fn failed_order_write_leaves_no_reservation() {
    let h = Harness::new();
    let f = h.live_seckill(5, 0, 0).await;

    h.repo.fail_next_order_insert();
    assert!(h.buy(1, f.product.id, 2).await.is_err());
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 0);
    assert!(h.repo.orders().await.is_empty());
    assert!(h.repo.seckill_orders().await.is_empty());
    let session = h.repo.find_session(f.session.id).await.unwrap().unwrap();
    assert_eq!(session.sold_quantity, 0);

    h.buy(1, f.product.id, 2).await.unwrap();
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 2);
}

#[tokio::test]
async fn transient_conflicts_are_retried_then_surface() {
    let h = Harness::new();
    let f = h.live_seckill(5, 0, 0).await;

    h.repo.inject_conflicts(2);
    h.buy(1, f.product.id, 1).await.unwrap();

    h.repo.inject_conflicts(100);
    assert!(matches!(
        h.buy(2, f.product.id, 1).await,
        Err(AppError::PersistenceConflict(_))
    ));
    h.repo.inject_conflicts(0);
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 1);
}

#[tokio::test]
async fn conflicts_past_the_budget_surface_as_timeout_without_writes() {
    let h = Harness::new();
    let f = h.live_seckill(5, 0, 0).await;
    let (events, _rx) = EventPublisher::channel();
    let policy = RetryPolicy::builder()
        .max_retries(1_000)
        .initial_delay(StdDuration::from_millis(5))
        .max_delay(StdDuration::from_millis(5))
        .build();
    let admission = AdmissionService::new(
        h.repo.clone(),
        events,
        policy,
        StdDuration::from_millis(40),
    );
    let request = SeckillAdmissionRequest {
        member_id: 1,
        seckill_product_id: f.product.id,
        quantity: 1,
    };

    h.repo.inject_conflicts(10_000);
    assert!(matches!(
        admission.admit_seckill(request.clone()).await,
        Err(AppError::Timeout(_))
    ));
    h.repo.inject_conflicts(0);
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 0);
    assert!(h.repo.orders().await.is_empty());

    // 预算内完成的尝试照常返回成功
    let admitted = admission.admit_seckill(request).await.unwrap();
    assert_eq!(admitted.reservation.sold_quantity, 1);
}

#[tokio::test]
async fn sold_out_session_recovers_after_release() {
    let h = Harness::new();
    let f = h.live_seckill(2, 0, 0).await;

    let first = h.buy(1, f.product.id, 1).await.unwrap();
    assert!(!first.session_sold_out);
    let second = h.buy(2, f.product.id, 1).await.unwrap();
    assert!(second.session_sold_out);
    assert_eq!(
        h.repo
            .campaign_status(CampaignRef::Session(f.session.id))
            .await
            .unwrap(),
        Some(CampaignStatus::SoldOut)
    );
    assert!(matches!(
        h.buy(3, f.product.id, 1).await,
        Err(AppError::CampaignNotPurchasable(_))
    ));

    let released = h
        .admission
        .cancel_seckill_order(second.seckill_order_id)
        .await
        .unwrap()
        .unwrap();
    assert!(released.reopened);
    assert_eq!(
        h.repo
            .campaign_status(CampaignRef::Session(f.session.id))
            .await
            .unwrap(),
        Some(CampaignStatus::Active)
    );
    h.buy(3, f.product.id, 1).await.unwrap();
}

#[tokio::test]
async fn admin_adjustment_cannot_go_below_sold() {
    let h = Harness::new();
    let f = h.live_seckill(2, 0, 0).await;
    h.buy(1, f.product.id, 2).await.unwrap();

    let unit = StockUnit::SeckillProduct(f.product.id);
    assert!(matches!(
        h.campaigns.adjust_quantity(unit, 1).await,
        Err(AppError::ValidationError(_))
    ));

    let snapshot = h.campaigns.adjust_quantity(unit, 5).await.unwrap();
    assert_eq!(snapshot.remaining(), 3);
    // 补库存后场次恢复可售
    assert_eq!(
        h.repo
            .campaign_status(CampaignRef::Session(f.session.id))
            .await
            .unwrap(),
        Some(CampaignStatus::Active)
    );
    h.buy(2, f.product.id, 3).await.unwrap();
}

#[tokio::test]
async fn payment_timeout_sweep_releases_unpaid_orders_once() {
    let h = Harness::new();
    let f = h.live_seckill(10, 0, 0).await;

    let unpaid = h.buy(1, f.product.id, 2).await.unwrap();
    let paid = h.buy(2, f.product.id, 1).await.unwrap();
    assert!(
        h.admission
            .confirm_seckill_payment(paid.seckill_order_id)
            .await
            .unwrap()
    );
    // 重复支付确认
    assert!(
        !h.admission
            .confirm_seckill_payment(paid.seckill_order_id)
            .await
            .unwrap()
    );

    let timeout = Duration::minutes(15);
    let early = h
        .admission
        .sweep_payment_timeouts(Utc::now(), timeout)
        .await
        .unwrap();
    assert_eq!(early.resolved, 0);

    let later = Utc::now() + Duration::minutes(16);
    let report = h
        .admission
        .sweep_payment_timeouts(later, timeout)
        .await
        .unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(report.released_quantity, 2);
    assert_eq!(h.sold(StockUnit::SeckillProduct(f.product.id)).await, 1);

    let again = h
        .admission
        .sweep_payment_timeouts(later, timeout)
        .await
        .unwrap();
    assert_eq!(again.resolved, 0);

    let orders = h.repo.seckill_orders().await;
    let status_of = |id| orders.iter().find(|o| o.id == id).unwrap().status;
    assert_eq!(status_of(unpaid.seckill_order_id), SeckillOrderStatus::Cancelled);
    assert_eq!(status_of(paid.seckill_order_id), SeckillOrderStatus::Paid);

    // 已取消的订单不能再支付
    assert!(
        !h.admission
            .confirm_seckill_payment(unpaid.seckill_order_id)
            .await
            .unwrap()
    );
}
