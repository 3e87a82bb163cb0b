pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod signature;
pub mod telemetry;

pub use api::{FeedApi, HttpFeedApi};
pub use config::FeedConfig;
pub use error::{FeedError, FeedResult};
pub use feed::{FeedSession, RefreshNotice, VoteOutcome};
pub use models::{Identity, Page, Post, VoteCounts, VoteType};
pub use signature::{DateRange, QuerySignature, SortMode};
