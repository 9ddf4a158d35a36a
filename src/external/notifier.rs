//! 通知出口（库存预警、成团、退款发起）
//!
//! 模板化的消息投递由外部系统负责，这里只定义注入点。

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{RefundRequest, StockWarning};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn stock_warning(&self, warning: &StockWarning) -> AppResult<()>;

    async fn group_succeeded(&self, group_no: &str, member_ids: &[i64]) -> AppResult<()>;

    async fn refund_required(&self, request: &RefundRequest) -> AppResult<()>;
}

/// 仅写日志的通知实现
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn stock_warning(&self, warning: &StockWarning) -> AppResult<()> {
        log::warn!(
            "Stock warning: product {} ({}) sku {} stock {} <= {}",
            warning.product_id,
            warning.product_name,
            warning.sku_id,
            warning.stock,
            warning.threshold
        );
        Ok(())
    }

    async fn group_succeeded(&self, group_no: &str, member_ids: &[i64]) -> AppResult<()> {
        log::info!("Group {group_no} succeeded with members {member_ids:?}");
        Ok(())
    }

    async fn refund_required(&self, request: &RefundRequest) -> AppResult<()> {
        log::info!(
            "Refund required: order {} member {} amount {} ({})",
            request.order_id,
            request.member_id,
            request.amount,
            request.reason
        );
        Ok(())
    }
}
