pub mod admission;
pub mod campaign;
pub mod catalog;
pub mod display;
pub mod group;
pub mod stock_unit;

pub use admission::*;
pub use campaign::*;
pub use catalog::*;
pub use display::{DisplayStatus, DisplayWindow, group_buy_display_status, session_display_status};
pub use group::*;
pub use stock_unit::*;
