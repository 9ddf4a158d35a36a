//! Background sweeps.
//!
//! Time-driven campaign transitions, group expiry and seckill payment timeouts.
//! Every sweep is a sequence of conditional writes, so running several
//! instances of this process side by side is safe.
//! Call `spawn_all` once during startup to launch them.

use chrono::Utc;

use crate::config::SweepConfig;
use crate::services::{AdmissionService, CampaignService, GroupBuyService};

/// Spawn all background tasks.
///
/// This function detaches tasks via `tokio::spawn`; it does not block.
pub fn spawn_all(
    campaign_service: CampaignService,
    admission_service: AdmissionService,
    group_buy_service: GroupBuyService,
    sweep: SweepConfig,
) {
    // 活动 / 场次 / 拼团 到点开始与结束
    {
        let svc = campaign_service.clone();
        let interval = std::time::Duration::from_secs(sweep.campaign_interval_secs);
        tokio::spawn(async move {
            loop {
                match svc.run_sweep(Utc::now()).await {
                    Ok(report) if report.started + report.ended > 0 => log::info!(
                        "Campaign sweep: started {}, ended {}, skipped {}",
                        report.started,
                        report.ended,
                        report.skipped
                    ),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to run campaign sweep: {e:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    // 到期未成团的团整体失败
    {
        let svc = group_buy_service.clone();
        let interval = std::time::Duration::from_secs(sweep.group_expiry_interval_secs);
        tokio::spawn(async move {
            loop {
                match svc.sweep_expired(Utc::now()).await {
                    Ok(report) if report.resolved > 0 => log::info!(
                        "Expired groups failed: {}, released {}, refunds requested {}",
                        report.resolved,
                        report.released_quantity,
                        report.refunds_requested
                    ),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to sweep expired groups: {e:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    // 秒杀订单支付超时
    {
        let svc = admission_service.clone();
        let interval = std::time::Duration::from_secs(sweep.payment_timeout_interval_secs.max(1));
        let payment_timeout = chrono::Duration::seconds(sweep.payment_timeout_secs);
        tokio::spawn(async move {
            loop {
                match svc.sweep_payment_timeouts(Utc::now(), payment_timeout).await {
                    Ok(report) if report.resolved > 0 => log::info!(
                        "Unpaid seckill orders cancelled: {}, released {}",
                        report.resolved,
                        report.released_quantity
                    ),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to sweep unpaid seckill orders: {e:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }
}
