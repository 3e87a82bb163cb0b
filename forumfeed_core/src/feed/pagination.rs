use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::FeedApi;
use crate::error::{FeedError, FeedResult};
use crate::feed::cache::{AppendOutcome, FingerprintCache, TailState};
use crate::models::{Page, Post};
use crate::signature::QuerySignature;

type SharedLoad = Shared<BoxFuture<'static, FeedResult<Page>>>;

struct InFlight {
    id: u64,
    load: SharedLoad,
}

/// Forward-only cursor pagination over the fingerprint cache.
///
/// At most one fetch per signature runs at a time; callers arriving while it
/// is outstanding await the same result.
#[derive(Clone)]
pub struct PaginationEngine {
    api: Arc<dyn FeedApi>,
    cache: FingerprintCache,
    page_size: usize,
    inflight: Arc<Mutex<HashMap<QuerySignature, InFlight>>>,
    next_load_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl PaginationEngine {
    pub fn new(api: Arc<dyn FeedApi>, cache: FingerprintCache, page_size: usize) -> Self {
        Self::with_shutdown(api, cache, page_size, CancellationToken::new())
    }

    /// Once `shutdown` is cancelled, fetches still finish but nothing is
    /// written to the cache.
    pub fn with_shutdown(
        api: Arc<dyn FeedApi>,
        cache: FingerprintCache,
        page_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            cache,
            page_size: page_size.max(1),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_load_id: Arc::new(AtomicU64::new(1)),
            shutdown,
        }
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub async fn load_next(&self, signature: &QuerySignature) -> FeedResult<Page> {
        signature.validate()?;

        let load = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.get(signature) {
                debug!(%signature, load_id = existing.id, "joining in-flight page load");
                existing.load.clone()
            } else {
                let tail = self.cache.tail(signature).await;
                if tail.is_terminal() {
                    debug!(%signature, "feed exhausted, skipping fetch");
                    return Ok(Page::empty());
                }
                let id = self.next_load_id.fetch_add(1, Ordering::Relaxed);
                let load = self.spawn_load(signature.clone(), tail, id);
                inflight.insert(
                    signature.clone(),
                    InFlight {
                        id,
                        load: load.clone(),
                    },
                );
                load
            }
        };

        load.await
    }

    /// Drops the cached pages of `signature` and fetches its first page again.
    /// A load already under way is awaited first so its append cannot land on
    /// the fresh sequence.
    pub async fn reload(&self, signature: &QuerySignature) -> FeedResult<Page> {
        signature.validate()?;
        let outstanding = self
            .inflight
            .lock()
            .await
            .get(signature)
            .map(|entry| entry.load.clone());
        if let Some(load) = outstanding {
            let _ = load.await;
        }
        self.cache.invalidate(signature).await;
        self.load_next(signature).await
    }

    /// Every cached post for `signature`, in display order.
    pub async fn posts(&self, signature: &QuerySignature) -> Vec<Post> {
        self.cache.posts(signature).await
    }

    pub async fn has_more(&self, signature: &QuerySignature) -> bool {
        !self.cache.tail(signature).await.is_terminal()
    }

    fn spawn_load(&self, signature: QuerySignature, tail: TailState, id: u64) -> SharedLoad {
        let api = self.api.clone();
        let cache = self.cache.clone();
        let inflight = self.inflight.clone();
        let shutdown = self.shutdown.clone();
        let page_size = self.page_size;

        let task = tokio::spawn(async move {
            let result =
                fetch_and_append(api.as_ref(), &cache, &signature, tail, page_size, &shutdown)
                    .await;
            let mut inflight = inflight.lock().await;
            if inflight.get(&signature).map(|entry| entry.id) == Some(id) {
                inflight.remove(&signature);
            }
            result
        });

        async move {
            task.await
                .unwrap_or_else(|err| Err(FeedError::fetch(format!("page load task failed: {err}"))))
        }
        .boxed()
        .shared()
    }
}

async fn fetch_and_append(
    api: &dyn FeedApi,
    cache: &FingerprintCache,
    signature: &QuerySignature,
    tail: TailState,
    page_size: usize,
    shutdown: &CancellationToken,
) -> FeedResult<Page> {
    let response = api
        .fetch_page(signature, tail.cursor.as_deref(), page_size)
        .await?;
    let mut page = Page::from(response);

    let known = cache.known_ids(signature).await;
    let received = page.posts.len();
    let mut seen = HashSet::new();
    page.posts
        .retain(|post| !known.contains(&post.id) && seen.insert(post.id.clone()));
    if page.posts.len() < received {
        debug!(
            %signature,
            dropped = received - page.posts.len(),
            "suppressed posts already on earlier pages"
        );
    }

    match cache
        .append_at(signature, tail.next_index, tail.generation, page.clone(), shutdown)
        .await
    {
        AppendOutcome::Appended { index } => {
            debug!(%signature, index, posts = page.posts.len(), has_more = page.has_more, "page cached");
            Ok(page)
        }
        AppendOutcome::Closed => {
            debug!(%signature, "feed torn down, page not cached");
            Ok(page)
        }
        AppendOutcome::StaleWriteDiscarded => {
            let current = cache.tail(signature).await;
            Ok(Page {
                posts: Vec::new(),
                next_cursor: current.cursor,
                has_more: current.has_more,
            })
        }
    }
}
