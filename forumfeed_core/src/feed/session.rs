use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{FeedApi, HttpFeedApi};
use crate::config::FeedConfig;
use crate::error::FeedResult;
use crate::feed::cache::FingerprintCache;
use crate::feed::pagination::PaginationEngine;
use crate::feed::refresh::{RefreshNotice, RefreshScheduler};
use crate::feed::voting::{PendingMutation, VoteEngine, VoteOutcome};
use crate::models::{Identity, Page, Post, VoteType};
use crate::signature::QuerySignature;

/// One mounted feed view: shared cache, pagination, voting and background
/// refresh, all torn down together by [`FeedSession::close`].
pub struct FeedSession {
    cache: FingerprintCache,
    pages: PaginationEngine,
    votes: VoteEngine,
    scheduler: Mutex<RefreshScheduler>,
    notices: watch::Receiver<Option<RefreshNotice>>,
    refresh_interval: Duration,
    shutdown: CancellationToken,
}

impl FeedSession {
    pub fn new(api: Arc<dyn FeedApi>, config: &FeedConfig) -> Self {
        let cache = FingerprintCache::new();
        let shutdown = CancellationToken::new();
        let pages = PaginationEngine::with_shutdown(
            api.clone(),
            cache.clone(),
            config.page_size,
            shutdown.clone(),
        );
        let votes = VoteEngine::with_shutdown(api.clone(), cache.clone(), shutdown.clone());
        let scheduler =
            RefreshScheduler::with_shutdown(api, cache.clone(), config.page_size, shutdown.clone());
        let notices = scheduler.subscribe();
        Self {
            cache,
            pages,
            votes,
            scheduler: Mutex::new(scheduler),
            notices,
            refresh_interval: config.refresh_interval(),
            shutdown,
        }
    }

    /// A session talking to the HTTP backend named in `config`.
    pub fn connect(config: &FeedConfig) -> anyhow::Result<Self> {
        let api = HttpFeedApi::from_config(config)?;
        info!(api_url = api.base_url(), page_size = config.page_size, "feed session ready");
        Ok(Self::new(Arc::new(api), config))
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub async fn load_next(&self, signature: &QuerySignature) -> FeedResult<Page> {
        self.pages.load_next(signature).await
    }

    pub async fn has_more(&self, signature: &QuerySignature) -> bool {
        self.pages.has_more(signature).await
    }

    pub async fn posts(&self, signature: &QuerySignature) -> Vec<Post> {
        self.pages.posts(signature).await
    }

    pub async fn vote(
        &self,
        voter: &Identity,
        post_id: &str,
        vote_type: VoteType,
    ) -> FeedResult<VoteOutcome> {
        self.votes.apply_vote(post_id, &voter.uid, vote_type).await
    }

    pub async fn pending_vote(&self, voter: &Identity, post_id: &str) -> Option<PendingMutation> {
        self.votes.pending(post_id, &voter.uid).await
    }

    /// Starts background refresh of `signature` at the configured interval.
    pub async fn watch(&self, signature: &QuerySignature) {
        self.watch_every(signature, self.refresh_interval).await;
    }

    pub async fn watch_every(&self, signature: &QuerySignature, interval: Duration) {
        self.scheduler
            .lock()
            .await
            .start(signature.clone(), interval);
    }

    pub async fn unwatch(&self) {
        self.scheduler.lock().await.stop();
    }

    pub fn notices(&self) -> watch::Receiver<Option<RefreshNotice>> {
        self.notices.clone()
    }

    pub fn has_new_items(&self) -> bool {
        self.notices.borrow().is_some()
    }

    /// The user acted on a notice: reload the first page and clear it.
    pub async fn refresh(&self, signature: &QuerySignature) -> FeedResult<Page> {
        let page = self.pages.reload(signature).await?;
        self.scheduler.lock().await.acknowledge();
        Ok(page)
    }

    /// Stops refreshing and prevents any further cache writes. In-flight
    /// requests finish on their own.
    pub async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.scheduler.lock().await.stop();
        info!("feed session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
