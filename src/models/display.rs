//! 店铺前台展示用的动态状态
//!
//! 只根据 (is_enabled, now, 开始/结束时间, 已售/总量) 推导，不落库。
//! 准入判断只能使用持久化的 [`crate::entities::CampaignStatus`]，
//! 这里的类型不会出现在准入链路中。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{group_buy_entity, seckill_session_entity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Pending,
    Active,
    Ended,
    Cancelled,
    SoldOut,
}

impl std::fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayStatus::Pending => write!(f, "pending"),
            DisplayStatus::Active => write!(f, "active"),
            DisplayStatus::Ended => write!(f, "ended"),
            DisplayStatus::Cancelled => write!(f, "cancelled"),
            DisplayStatus::SoldOut => write!(f, "sold_out"),
        }
    }
}

/// 推导展示状态所需的输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayWindow {
    pub is_enabled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sold_quantity: i32,
    pub total_quantity: i32,
}

impl DisplayWindow {
    /// 优先级: 禁用 > 售罄 > 未开始 > 已结束 > 进行中
    pub fn status_at(&self, now: DateTime<Utc>) -> DisplayStatus {
        if !self.is_enabled {
            DisplayStatus::Cancelled
        } else if self.total_quantity > 0 && self.sold_quantity >= self.total_quantity {
            DisplayStatus::SoldOut
        } else if now < self.start_time {
            DisplayStatus::Pending
        } else if now > self.end_time {
            DisplayStatus::Ended
        } else {
            DisplayStatus::Active
        }
    }
}

impl From<&seckill_session_entity::Model> for DisplayWindow {
    fn from(m: &seckill_session_entity::Model) -> Self {
        DisplayWindow {
            is_enabled: m.is_enabled,
            start_time: m.start_time,
            end_time: m.end_time,
            sold_quantity: m.sold_quantity,
            total_quantity: m.total_quantity,
        }
    }
}

impl From<&group_buy_entity::Model> for DisplayWindow {
    fn from(m: &group_buy_entity::Model) -> Self {
        DisplayWindow {
            is_enabled: m.is_enabled,
            start_time: m.start_time,
            end_time: m.end_time,
            sold_quantity: m.sold_quantity,
            total_quantity: m.total_quantity,
        }
    }
}

pub fn session_display_status(
    session: &seckill_session_entity::Model,
    now: DateTime<Utc>,
) -> DisplayStatus {
    DisplayWindow::from(session).status_at(now)
}

pub fn group_buy_display_status(
    group_buy: &group_buy_entity::Model,
    now: DateTime<Utc>,
) -> DisplayStatus {
    DisplayWindow::from(group_buy).status_at(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window(now: DateTime<Utc>) -> DisplayWindow {
        DisplayWindow {
            is_enabled: true,
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            sold_quantity: 3,
            total_quantity: 10,
        }
    }

    #[test]
    fn active_inside_window() {
        let now = Utc::now();
        assert_eq!(window(now).status_at(now), DisplayStatus::Active);
    }

    #[test]
    fn disabled_wins_over_everything() {
        let now = Utc::now();
        let mut w = window(now);
        w.is_enabled = false;
        w.sold_quantity = 10;
        assert_eq!(w.status_at(now), DisplayStatus::Cancelled);
    }

    #[test]
    fn sold_out_before_time_checks() {
        let now = Utc::now();
        let mut w = window(now);
        w.sold_quantity = 10;
        assert_eq!(w.status_at(now - Duration::hours(5)), DisplayStatus::SoldOut);
    }

    #[test]
    fn zero_total_is_never_sold_out() {
        let now = Utc::now();
        let mut w = window(now);
        w.sold_quantity = 0;
        w.total_quantity = 0;
        assert_eq!(w.status_at(now), DisplayStatus::Active);
    }

    #[test]
    fn pending_and_ended_by_clock() {
        let now = Utc::now();
        let w = window(now);
        assert_eq!(w.status_at(now - Duration::hours(2)), DisplayStatus::Pending);
        assert_eq!(w.status_at(now + Duration::hours(2)), DisplayStatus::Ended);
    }
}
