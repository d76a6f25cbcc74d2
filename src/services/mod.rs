pub mod executor;
pub mod providers;
pub mod reconciler;
pub mod resolver;
pub mod retry;
pub mod source_list;
pub mod sync;
pub mod target_list;

pub use executor::SyncExecutor;
pub use reconciler::{reconcile, SyncPlan};
pub use resolver::IdentifierResolver;
pub use retry::RetryPolicy;
pub use source_list::{fetch_source_list, parse_source_list, ParsedSourceList};
pub use sync::SyncEngine;
pub use target_list::{read_target_state, TargetWatchlistState};
