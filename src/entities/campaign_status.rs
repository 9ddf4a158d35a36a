use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 活动 / 场次 / 拼团活动 的持久化状态
///
/// 这是准入 (admission) 的唯一授权来源，展示用的动态状态见
/// [`crate::models::DisplayStatus`]，两者刻意分开。
/// Activity 没有库存，因此不会进入 `SoldOut`。
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "ended")]
    Ended,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "sold_out")]
    SoldOut,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Pending => write!(f, "pending"),
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Ended => write!(f, "ended"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
            CampaignStatus::SoldOut => write!(f, "sold_out"),
        }
    }
}

/// 管理端 / 定时任务触发的状态迁移指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignCommand {
    Start,
    End,
    Cancel,
    /// 库存售罄（仅由库存账本触发）
    Exhaust,
}

impl std::fmt::Display for CampaignCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignCommand::Start => write!(f, "start"),
            CampaignCommand::End => write!(f, "end"),
            CampaignCommand::Cancel => write!(f, "cancel"),
            CampaignCommand::Exhaust => write!(f, "exhaust"),
        }
    }
}

/// 非法状态迁移（调用方逻辑错误，必须向上传播）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {command} a campaign in state {from}")]
pub struct TransitionError {
    pub from: CampaignStatus,
    pub command: CampaignCommand,
}

impl CampaignStatus {
    /// 状态机核心:
    /// - start: 仅 pending -> active
    /// - end: 除 ended 以外任意状态 -> ended (重复 end 为错误)
    /// - cancel: pending / active -> cancelled
    /// - exhaust: active -> sold_out
    pub fn apply(self, command: CampaignCommand) -> Result<CampaignStatus, TransitionError> {
        use CampaignStatus::*;
        let next = match (command, self) {
            (CampaignCommand::Start, Pending) => Some(Active),
            (CampaignCommand::End, Ended) => None,
            (CampaignCommand::End, _) => Some(Ended),
            (CampaignCommand::Cancel, Pending | Active) => Some(Cancelled),
            (CampaignCommand::Exhaust, Active) => Some(SoldOut),
            _ => None,
        };
        next.ok_or(TransitionError {
            from: self,
            command,
        })
    }

    pub fn start(self) -> Result<CampaignStatus, TransitionError> {
        self.apply(CampaignCommand::Start)
    }

    pub fn end(self) -> Result<CampaignStatus, TransitionError> {
        self.apply(CampaignCommand::End)
    }

    pub fn cancel(self) -> Result<CampaignStatus, TransitionError> {
        self.apply(CampaignCommand::Cancel)
    }

    pub fn exhaust(self) -> Result<CampaignStatus, TransitionError> {
        self.apply(CampaignCommand::Exhaust)
    }

    /// 终态：不会再被定时任务推进
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Ended | CampaignStatus::Cancelled)
    }
}
