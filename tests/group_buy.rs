//! Group buy: joining, quorum promotion, expiry and late payments.

mod common;

use chrono::{Duration, Utc};
use futures_util::future::join_all;

use common::Harness;
use seckill_backend::AppError;
use seckill_backend::entities::{CampaignStatus, GroupBuyOrderStatus, OrderStatus};
use seckill_backend::models::*;
use seckill_backend::repositories::PromotionRepository;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quorum_promotes_group_exactly_once_under_concurrent_confirmations() {
    let h = Harness::new();
    let gb = h.live_group_buy(3, 5, 30).await;

    let leader = h.join(1, gb.id, None).await.unwrap();
    assert!(leader.is_leader);
    let group_no = leader.group_no.clone();
    let second = h.join(2, gb.id, Some(&group_no)).await.unwrap();
    let third = h.join(3, gb.id, Some(&group_no)).await.unwrap();
    assert!(!second.is_leader && !third.is_leader);

    let confirmations = [leader, second, third].map(|a| {
        let groups = h.groups.clone();
        tokio::spawn(async move { groups.confirm_payment(a.group_buy_order_id).await })
    });
    let outcomes: Vec<_> = join_all(confirmations)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert!(
        outcomes
            .iter()
            .any(|o| matches!(o, GroupPaymentOutcome::Grouped { .. }))
    );
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

#[tokio::test]
async fn duplicate_confirmations_are_harmless() {
    let h = Harness::new();
    let gb = h.live_group_buy(2, 0, 10).await;

    let leader = h.join(1, gb.id, None).await.unwrap();
    let member = h.join(2, gb.id, Some(&leader.group_no)).await.unwrap();

    let first = h.groups.confirm_payment(leader.group_buy_order_id).await.unwrap();
    assert_eq!(
        first,
        GroupPaymentOutcome::Waiting {
            group_no: leader.group_no.clone(),
            paid: 1,
            required: 2
        }
    );
    // 同一订单重复确认，人数不变
    let again = h.groups.confirm_payment(leader.group_buy_order_id).await.unwrap();
    assert!(matches!(again, GroupPaymentOutcome::Waiting { paid: 1, .. }));

    let done = h.groups.confirm_payment(member.group_buy_order_id).await.unwrap();
    assert!(matches!(done, GroupPaymentOutcome::Grouped { .. }));

    let late = h.groups.confirm_payment(member.group_buy_order_id).await.unwrap();
    assert!(matches!(late, GroupPaymentOutcome::Ignored { .. }));
    assert_eq!(h.notifier.successes.lock().unwrap().len(), 1);

    let gb = h.repo.find_group_buy(gb.id).await.unwrap().unwrap();
    assert_eq!(gb.success_group_count, 1);
}

#[tokio::test]
async fn expired_group_fails_releases_stock_and_requests_refunds() {
    let h = Harness::new();
    let gb = h.live_group_buy(3, 0, 10).await;

    let leader = h.join(1, gb.id, None).await.unwrap();
    let member = h.join(2, gb.id, Some(&leader.group_no)).await.unwrap();
    h.groups.confirm_payment(leader.group_buy_order_id).await.unwrap();
    assert_eq!(h.sold(StockUnit::GroupBuy(gb.id)).await, 2);

    // 未到期不处理
    let early = h.groups.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(early.resolved, 0);

    let later = Utc::now() + Duration::hours(25);
    let report = h.groups.sweep_expired(later).await.unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(report.released_quantity, 2);
    assert_eq!(report.refunds_requested, 1);
    assert_eq!(h.sold(StockUnit::GroupBuy(gb.id)).await, 0);

    let refunds = h.notifier.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].member_id, 1);
    assert_eq!(refunds[0].amount, 900);

    let members = h.repo.list_group_members(&leader.group_no).await.unwrap();
    assert!(members.iter().all(|m| m.status == GroupBuyOrderStatus::Failed));
    let orders = h.repo.orders().await;
    assert!(
        orders
            .iter()
            .filter(|o| o.id == leader.order_id || o.id == member.order_id)
            .all(|o| o.status == OrderStatus::Closed)
    );

    // 再次扫描不会重复释放
    let again = h.groups.sweep_expired(later).await.unwrap();
    assert_eq!(again.resolved, 0);
    assert_eq!(h.notifier.refunds.lock().unwrap().len(), 1);

    // 失败后才到达的支付确认被忽略
    let late = h.groups.confirm_payment(member.group_buy_order_id).await.unwrap();
    assert_eq!(
        late,
        GroupPaymentOutcome::Ignored {
            group_no: leader.group_no.clone()
        }
    );
    assert!(h.notifier.successes.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_expiry_sweeps_release_once() {
    let h = Harness::new();
    let gb = h.live_group_buy(2, 0, 10).await;
    let leader = h.join(1, gb.id, None).await.unwrap();
    assert_eq!(h.sold(StockUnit::GroupBuy(gb.id)).await, 1);

    let later = Utc::now() + Duration::hours(30);
    let sweeps = (0..4).map(|_| {
        let groups = h.groups.clone();
        tokio::spawn(async move { groups.sweep_expired(later).await })
    });
    let total: usize = join_all(sweeps)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().resolved)
        .sum();

    assert_eq!(total, 1);
    assert_eq!(h.sold(StockUnit::GroupBuy(gb.id)).await, 0);
    let members = h.repo.list_group_members(&leader.group_no).await.unwrap();
    assert_eq!(members[0].status, GroupBuyOrderStatus::Failed);
}

#[tokio::test]
async fn join_rules() {
    let h = Harness::new();
    let gb = h.live_group_buy(2, 2, 10).await;

    let leader = h.join(1, gb.id, None).await.unwrap();
    assert!(matches!(
        h.join(1, gb.id, Some(&leader.group_no)).await,
        Err(AppError::ValidationError(_))
    ));
    h.join(2, gb.id, Some(&leader.group_no)).await.unwrap();
    assert!(matches!(
        h.join(3, gb.id, Some(&leader.group_no)).await,
        Err(AppError::GroupUnavailable(_))
    ));
    assert!(matches!(
        h.join(3, gb.id, Some("G000")).await,
        Err(AppError::GroupUnavailable(_))
    ));
    assert!(matches!(
        h.join(3, gb.id, Some("  ")).await,
        Err(AppError::ValidationError(_))
    ));

    // 开新团不受影响，团号不同
    let other = h.join(3, gb.id, None).await.unwrap();
    assert_ne!(other.group_no, leader.group_no);
    let gb = h.repo.find_group_buy(gb.id).await.unwrap().unwrap();
    assert_eq!(gb.group_count, 2);
    assert_eq!(gb.sold_quantity, 3);
}

#[tokio::test]
async fn group_buy_sells_out_and_reopens_after_expiry() {
    let h = Harness::new();
    let gb = h.live_group_buy(3, 0, 2).await;

    let leader = h.join(1, gb.id, None).await.unwrap();
    let second = h.join(2, gb.id, Some(&leader.group_no)).await.unwrap();
    assert!(second.sold_out);
    assert_eq!(
        h.repo
            .campaign_status(CampaignRef::GroupBuy(gb.id))
            .await
            .unwrap(),
        Some(CampaignStatus::SoldOut)
    );
    assert!(matches!(
        h.join(3, gb.id, None).await,
        Err(AppError::CampaignNotPurchasable(_))
    ));

    let report = h
        .groups
        .sweep_expired(Utc::now() + Duration::hours(25))
        .await
        .unwrap();
    assert_eq!(report.released_quantity, 2);
    assert_eq!(
        h.repo
            .campaign_status(CampaignRef::GroupBuy(gb.id))
            .await
            .unwrap(),
        Some(CampaignStatus::Active)
    );
    h.join(3, gb.id, None).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_joins_never_exceed_group_stock() {
    let h = Harness::new();
    let gb = h.live_group_buy(2, 0, 5).await;
    let group_buy_id = gb.id;

    let racers = (1..=30).map(|member| {
        let admission = h.admission.clone();
        tokio::spawn(async move {
            admission
                .join_group_buy(GroupBuyJoinRequest {
                    member_id: member,
                    group_buy_id,
                    group_no: None,
                    quantity: 1,
                })
                .await
        })
    });
    let admitted = join_all(racers)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(admitted, 5);
    assert_eq!(h.sold(StockUnit::GroupBuy(gb.id)).await, 5);
    assert_eq!(h.repo.group_orders().await.len(), 5);
}
