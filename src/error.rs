use actix_web::{HttpResponse, ResponseError};
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;

use crate::entities::TransitionError;
use crate::models::StockUnit;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// 场次/活动未开始、已结束、被禁用或不存在
    #[error("Campaign not purchasable: {0}")]
    CampaignNotPurchasable(String),

    #[error("Purchase limit exceeded: limit {limit}, already bought {existing}, requested {requested}")]
    LimitExceeded {
        limit: i32,
        existing: i64,
        requested: i32,
    },

    #[error("Insufficient stock for {unit}: remaining {remaining}, requested {requested}")]
    InsufficientStock {
        unit: StockUnit,
        remaining: i32,
        requested: i32,
    },

    /// 存储层瞬时竞争（锁等待超时、死锁、序列化失败），内部有限次重试
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    /// 迟到的支付确认，团已成团/失败
    #[error("Group already resolved: {0}")]
    GroupAlreadyResolved(String),

    /// 团不可加入（已满、已过期、已结算）
    #[error("Group unavailable: {0}")]
    GroupUnavailable(String),

    #[error("Invalid campaign transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Database error: {0}")]
    DatabaseError(DbErr),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    /// 只有存储竞争值得重试，业务拒绝一律直接返回
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::PersistenceConflict(_))
    }

    /// 准入被业务规则拒绝（而非系统故障）
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::CampaignNotPurchasable(_)
                | AppError::LimitExceeded { .. }
                | AppError::InsufficientStock { .. }
                | AppError::GroupUnavailable(_)
        )
    }
}

// Postgres 锁等待 / 死锁 / 序列化失败 / 连接池耗尽 归类为可重试冲突
const CONFLICT_MARKERS: [&str; 8] = [
    "could not serialize access",
    "deadlock detected",
    "lock timeout",
    "could not obtain lock",
    "40001",
    "40P01",
    "55P03",
    "pool timed out",
];

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        let msg = err.to_string();
        if CONFLICT_MARKERS.iter().any(|m| msg.contains(m)) {
            AppError::PersistenceConflict(msg)
        } else {
            AppError::DatabaseError(err)
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("JSON serialization error: {err}"))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status_code, error_code, message) = match self {
            AppError::CampaignNotPurchasable(msg) => {
                log::debug!("Campaign not purchasable: {msg}");
                (
                    StatusCode::CONFLICT,
                    "NOT_STARTED_OR_ENDED",
                    "The sale has not started or is no longer available".to_string(),
                )
            }
            AppError::LimitExceeded { .. } => (
                StatusCode::CONFLICT,
                "LIMIT_REACHED",
                "Purchase limit reached".to_string(),
            ),
            AppError::InsufficientStock { .. } => {
                (StatusCode::CONFLICT, "SOLD_OUT", "Sold out".to_string())
            }
            AppError::GroupUnavailable(msg) => (
                StatusCode::CONFLICT,
                "GROUP_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::GroupAlreadyResolved(_) => (
                StatusCode::OK,
                "GROUP_ALREADY_RESOLVED",
                "Group already resolved".to_string(),
            ),
            AppError::InvalidTransition(err) => {
                log::warn!("Invalid campaign transition: {err}");
                (
                    StatusCode::CONFLICT,
                    "INVALID_TRANSITION",
                    err.to_string(),
                )
            }
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::PersistenceConflict(msg) | AppError::Timeout(msg) => {
                log::error!("Admission gave up after transient failures: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "TRY_AGAIN",
                    "The system is busy, please try again".to_string(),
                )
            }
            AppError::DatabaseError(err) => {
                log::error!("Database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TRY_AGAIN",
                    "The system is busy, please try again".to_string(),
                )
            }
            _ => {
                log::error!("Internal error: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        HttpResponse::build(status_code).json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn rejections_map_to_clear_reasons() {
        let (status, body) = body_of(AppError::InsufficientStock {
            unit: StockUnit::SeckillProduct(1),
            remaining: 0,
            requested: 1,
        })
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "SOLD_OUT");

        let (_, body) = body_of(AppError::LimitExceeded {
            limit: 2,
            existing: 2,
            requested: 1,
        })
        .await;
        assert_eq!(body["error"]["code"], "LIMIT_REACHED");

        let (_, body) = body_of(AppError::CampaignNotPurchasable("session 3".into())).await;
        assert_eq!(body["error"]["code"], "NOT_STARTED_OR_ENDED");
    }

    #[actix_web::test]
    async fn storage_errors_do_not_leak_details() {
        let (status, body) =
            body_of(AppError::PersistenceConflict("deadlock detected on seckill_products".into()))
                .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let message = body["error"]["message"].as_str().unwrap();
        assert!(!message.contains("seckill_products"));

        let (status, body) = body_of(AppError::DatabaseError(DbErr::Custom(
            "relation \"orders\" does not exist".into(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["error"]["message"].as_str().unwrap().contains("orders"));
    }

    #[test]
    fn lock_timeouts_are_retryable() {
        let err: AppError =
            DbErr::Custom("canceling statement due to lock timeout".into()).into();
        assert!(err.is_retryable());

        let err: AppError = DbErr::Custom("syntax error".into()).into();
        assert!(!err.is_retryable());
        assert!(matches!(err, AppError::DatabaseError(_)));
    }
}
