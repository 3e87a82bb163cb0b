use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{Page, Post};
use crate::signature::QuerySignature;

/// Result of a guarded append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { index: usize },
    /// The page was computed against a tail that no longer exists, either
    /// because another page landed first or the signature was invalidated.
    StaleWriteDiscarded,
    /// `shutdown` was cancelled before the write lock was taken.
    Closed,
}

/// Where the next page of a signature starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailState {
    pub next_index: usize,
    pub cursor: Option<String>,
    pub has_more: bool,
    pub generation: u64,
}

impl TailState {
    /// A signature whose last page said `hasMore = false`.
    pub fn is_terminal(&self) -> bool {
        self.next_index > 0 && !self.has_more
    }
}

#[derive(Debug, Default)]
struct Entry {
    pages: Vec<Page>,
    generation: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<QuerySignature, Entry>,
    // Survives invalidation so a dropped-and-recreated entry never reuses a
    // generation that an in-flight fetch may still hold.
    next_generation: u64,
}

impl CacheState {
    fn entry_mut(&mut self, signature: &QuerySignature) -> &mut Entry {
        let next_generation = &mut self.next_generation;
        self.entries.entry(signature.clone()).or_insert_with(|| {
            *next_generation += 1;
            Entry {
                pages: Vec::new(),
                generation: *next_generation,
            }
        })
    }
}

/// Session-scoped pages keyed by query signature.
#[derive(Clone, Default)]
pub struct FingerprintCache {
    state: Arc<RwLock<CacheState>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pages cached for `signature`, in fetch order.
    pub async fn get(&self, signature: &QuerySignature) -> Vec<Page> {
        let state = self.state.read().await;
        state
            .entries
            .get(signature)
            .map(|entry| entry.pages.clone())
            .unwrap_or_default()
    }

    /// Unconditionally appends `page` at the tail of `signature`.
    pub async fn append(&self, signature: &QuerySignature, page: Page) -> usize {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(signature);
        entry.pages.push(page);
        entry.pages.len() - 1
    }

    /// Appends `page` only if it is the expected next page of the expected
    /// generation and `shutdown` has not fired.
    pub async fn append_at(
        &self,
        signature: &QuerySignature,
        expected_index: usize,
        generation: u64,
        page: Page,
        shutdown: &CancellationToken,
    ) -> AppendOutcome {
        let mut state = self.state.write().await;
        if shutdown.is_cancelled() {
            return AppendOutcome::Closed;
        }
        let entry = state.entry_mut(signature);
        if entry.generation != generation || entry.pages.len() != expected_index {
            debug!(
                %signature,
                expected_index,
                actual_index = entry.pages.len(),
                "discarding stale page append"
            );
            return AppendOutcome::StaleWriteDiscarded;
        }
        entry.pages.push(page);
        AppendOutcome::Appended {
            index: expected_index,
        }
    }

    pub async fn invalidate(&self, signature: &QuerySignature) {
        let mut state = self.state.write().await;
        if state.entries.remove(signature).is_some() {
            debug!(%signature, "invalidated cached feed");
        }
    }

    pub async fn invalidate_all(&self) {
        let mut state = self.state.write().await;
        let dropped = state.entries.len();
        state.entries.clear();
        debug!(dropped, "invalidated every cached feed");
    }

    /// Cursor bookkeeping for the next page of `signature`. Creates the
    /// entry so the returned generation stays meaningful.
    pub async fn tail(&self, signature: &QuerySignature) -> TailState {
        let mut state = self.state.write().await;
        let entry = state.entry_mut(signature);
        let last = entry.pages.last();
        TailState {
            next_index: entry.pages.len(),
            cursor: last.and_then(|page| page.next_cursor.clone()),
            has_more: last.map(|page| page.has_more).unwrap_or(true),
            generation: entry.generation,
        }
    }

    /// Concatenated posts of every cached page.
    pub async fn posts(&self, signature: &QuerySignature) -> Vec<Post> {
        let state = self.state.read().await;
        state
            .entries
            .get(signature)
            .map(|entry| {
                entry
                    .pages
                    .iter()
                    .flat_map(|page| page.posts.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn first_page(&self, signature: &QuerySignature) -> Option<Page> {
        let state = self.state.read().await;
        state
            .entries
            .get(signature)
            .and_then(|entry| entry.pages.first().cloned())
    }

    pub async fn known_ids(&self, signature: &QuerySignature) -> HashSet<String> {
        let state = self.state.read().await;
        state
            .entries
            .get(signature)
            .map(|entry| {
                entry
                    .pages
                    .iter()
                    .flat_map(|page| page.posts.iter().map(|post| post.id.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Any cached copy of the post.
    pub async fn find_post(&self, post_id: &str) -> Option<Post> {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .flat_map(|entry| entry.pages.iter())
            .flat_map(|page| page.posts.iter())
            .find(|post| post.id == post_id)
            .cloned()
    }

    /// Applies `update` to every cached copy of the post across all
    /// signatures and returns how many copies were touched.
    pub async fn update_post<F>(&self, post_id: &str, mut update: F) -> usize
    where
        F: FnMut(&mut Post),
    {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for entry in state.entries.values_mut() {
            for page in entry.pages.iter_mut() {
                for post in page.posts.iter_mut().filter(|post| post.id == post_id) {
                    update(post);
                    touched += 1;
                }
            }
        }
        touched
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
