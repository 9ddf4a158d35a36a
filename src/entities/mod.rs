pub mod activities;
pub mod campaign_status;
pub mod group_buy_orders;
pub mod group_buys;
pub mod orders;
pub mod seckill_orders;
pub mod seckill_products;
pub mod seckill_sessions;

pub use activities as activity_entity;
pub use campaign_status::{CampaignCommand, CampaignStatus, TransitionError};
pub use group_buy_orders as group_buy_order_entity;
pub use group_buy_orders::GroupBuyOrderStatus;
pub use group_buys as group_buy_entity;
pub use orders as order_entity;
pub use orders::{OrderStatus, OrderType};
pub use seckill_orders as seckill_order_entity;
pub use seckill_orders::SeckillOrderStatus;
pub use seckill_products as seckill_product_entity;
pub use seckill_sessions as seckill_session_entity;
