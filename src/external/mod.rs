pub mod cache;
pub mod catalog;
pub mod notifier;

pub use cache::*;
pub use catalog::*;
pub use notifier::*;
