use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::FeedApi;
use crate::error::FeedResult;
use crate::feed::cache::FingerprintCache;
use crate::models::Page;
use crate::signature::QuerySignature;

/// Raised when the head of a feed has moved past what is on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshNotice {
    pub signature: QuerySignature,
    pub new_items: usize,
    pub detected_at: DateTime<Utc>,
}

/// Number of fetched posts ahead of the first one already displayed.
pub fn count_new_leading(displayed: Option<&Page>, fetched: &Page) -> usize {
    let Some(displayed) = displayed else {
        return fetched.posts.len();
    };
    let shown: HashSet<&str> = displayed.ids().collect();
    fetched.ids().take_while(|id| !shown.contains(id)).count()
}

struct Running {
    signature: QuerySignature,
    token: CancellationToken,
    _task: JoinHandle<()>,
}

/// Polls the first page of one feed and publishes a [`RefreshNotice`] when
/// new posts show up. It never touches the cached pages.
pub struct RefreshScheduler {
    api: Arc<dyn FeedApi>,
    cache: FingerprintCache,
    page_size: usize,
    parent: CancellationToken,
    notices: watch::Sender<Option<RefreshNotice>>,
    running: Option<Running>,
}

impl RefreshScheduler {
    pub fn new(api: Arc<dyn FeedApi>, cache: FingerprintCache, page_size: usize) -> Self {
        Self::with_shutdown(api, cache, page_size, CancellationToken::new())
    }

    /// Cancelling `parent` stops any schedule started from this scheduler.
    pub fn with_shutdown(
        api: Arc<dyn FeedApi>,
        cache: FingerprintCache,
        page_size: usize,
        parent: CancellationToken,
    ) -> Self {
        let (notices, _) = watch::channel(None);
        Self {
            api,
            cache,
            page_size: page_size.max(1),
            parent,
            notices,
            running: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RefreshNotice>> {
        self.notices.subscribe()
    }

    pub fn has_new_items(&self) -> bool {
        self.notices.borrow().is_some()
    }

    pub fn notice(&self) -> Option<RefreshNotice> {
        self.notices.borrow().clone()
    }

    /// Clears the current notice, typically after an explicit refresh.
    pub fn acknowledge(&self) {
        self.notices.send_replace(None);
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| !running.token.is_cancelled())
            .unwrap_or(false)
    }

    pub fn signature(&self) -> Option<&QuerySignature> {
        self.running.as_ref().map(|running| &running.signature)
    }

    /// Starts polling `signature`, replacing any running schedule. The first
    /// check happens one `interval` from now.
    pub fn start(&mut self, signature: QuerySignature, interval: Duration) {
        self.stop();
        if self.parent.is_cancelled() {
            debug!(%signature, "feed torn down, refresh schedule not started");
            return;
        }

        let token = self.parent.child_token();
        let task = tokio::spawn(run_schedule(
            self.api.clone(),
            self.cache.clone(),
            signature.clone(),
            interval,
            self.page_size,
            token.clone(),
            self.notices.clone(),
        ));
        info!(%signature, interval_secs = interval.as_secs_f64(), "refresh schedule started");
        self.running = Some(Running {
            signature,
            token,
            _task: task,
        });
    }

    /// Cancels the timer. A comparison fetch already under way finishes but
    /// its result is dropped.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.token.cancel();
            info!(signature = %running.signature, "refresh schedule stopped");
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.token.cancel();
        }
    }
}

async fn run_schedule(
    api: Arc<dyn FeedApi>,
    cache: FingerprintCache,
    signature: QuerySignature,
    interval: Duration,
    page_size: usize,
    token: CancellationToken,
    notices: watch::Sender<Option<RefreshNotice>>,
) {
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let checked = check_head(api.as_ref(), &cache, &signature, page_size).await;
        if token.is_cancelled() {
            debug!(%signature, "refresh schedule stopped mid-check, result dropped");
            break;
        }
        match checked {
            Ok(0) => debug!(%signature, "feed head unchanged"),
            Ok(new_items) => {
                info!(%signature, new_items, "new posts available");
                notices.send_replace(Some(RefreshNotice {
                    signature: signature.clone(),
                    new_items,
                    detected_at: Utc::now(),
                }));
            }
            Err(err) => warn!(%signature, error = %err, "background refresh failed"),
        }
    }
}

async fn check_head(
    api: &dyn FeedApi,
    cache: &FingerprintCache,
    signature: &QuerySignature,
    page_size: usize,
) -> FeedResult<usize> {
    let fetched = Page::from(api.fetch_page(signature, None, page_size).await?);
    let displayed = cache.first_page(signature).await;
    Ok(count_new_leading(displayed.as_ref(), &fetched))
}
