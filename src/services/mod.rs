pub mod admission_service;
pub mod cache_sync_service;
pub mod campaign_service;
pub mod group_buy_service;
pub mod purchase_limit;
pub mod stock_ledger;

pub use admission_service::*;
pub use cache_sync_service::*;
pub use campaign_service::*;
pub use group_buy_service::*;
pub use purchase_limit::*;
pub use stock_ledger::*;
