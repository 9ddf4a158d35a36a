pub mod group_no;
pub mod retry;

pub use group_no::generate_group_no;
pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_on_conflict, retry_within};
