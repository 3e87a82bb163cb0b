//! Client-side feed synchronization: cached pages per query signature,
//! coalesced cursor pagination, optimistic voting and head-of-feed polling.

pub mod cache;
pub mod pagination;
pub mod refresh;
pub mod session;
pub mod voting;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{AppendOutcome, FingerprintCache, TailState};
pub use pagination::PaginationEngine;
pub use refresh::{count_new_leading, RefreshNotice, RefreshScheduler};
pub use session::FeedSession;
pub use voting::{toggle_vote, MutationStatus, PendingMutation, VoteEngine, VoteOutcome};
