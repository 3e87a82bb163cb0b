//! In-memory feed backend used by the engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{oneshot, Semaphore};

use crate::api::FeedApi;
use crate::error::{FeedError, FeedResult};
use crate::feed::voting::toggle_vote;
use crate::models::{FeedResponse, Page, Post, VoteCounts, VoteType};
use crate::signature::QuerySignature;

pub(crate) fn post(id: &str) -> Post {
    Post {
        id: id.to_string(),
        author_id: "author".to_string(),
        title: format!("title {id}"),
        body: format!("body {id}"),
        tags: Default::default(),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        upvote_count: 0,
        downvote_count: 0,
        vote_by_user: Default::default(),
        comment_count: 0,
    }
}

pub(crate) fn page(ids: &[&str], next_cursor: Option<&str>, has_more: bool) -> Page {
    Page {
        posts: ids.iter().map(|id| post(id)).collect(),
        next_cursor: next_cursor.map(str::to_string),
        has_more,
    }
}

pub(crate) fn ids(posts: &[Post]) -> Vec<String> {
    posts.iter().map(|post| post.id.clone()).collect()
}

/// A fake backend serving one newest-first post list for every signature.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    posts: Mutex<Vec<Post>>,
    cursors: Mutex<Vec<Option<String>>>,
    signatures: Mutex<Vec<QuerySignature>>,
    pub(crate) fetch_calls: AtomicUsize,
    pub(crate) vote_calls: AtomicUsize,
    failing_fetches: AtomicUsize,
    fail_votes: AtomicBool,
    fetch_gate: Mutex<Option<Arc<Semaphore>>>,
    held_votes: Mutex<VecDeque<oneshot::Receiver<FeedResult<VoteCounts>>>>,
}

impl ScriptedApi {
    pub(crate) fn with_posts(ids: &[&str]) -> Arc<Self> {
        let api = Self::default();
        *api.posts.lock().unwrap() = ids.iter().map(|id| post(id)).collect();
        Arc::new(api)
    }

    pub(crate) fn prepend(&self, ids: &[&str]) {
        let mut posts = self.posts.lock().unwrap();
        let fresh: Vec<Post> = ids.iter().map(|id| post(id)).collect();
        posts.splice(0..0, fresh);
    }

    /// Overwrites the server-side copy of a post.
    pub(crate) fn set_post(&self, updated: Post) {
        let mut posts = self.posts.lock().unwrap();
        if let Some(existing) = posts.iter_mut().find(|post| post.id == updated.id) {
            *existing = updated;
        }
    }

    pub(crate) fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }

    /// Signatures of every fetch, in call order.
    pub(crate) fn signatures(&self) -> Vec<QuerySignature> {
        self.signatures.lock().unwrap().clone()
    }

    pub(crate) fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_votes(&self, fail: bool) {
        self.fail_votes.store(fail, Ordering::SeqCst);
    }

    /// Blocks fetches until permits are added to the returned semaphore.
    pub(crate) fn gate_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.fetch_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// The next vote call waits for the returned sender's reply.
    pub(crate) fn hold_next_vote(&self) -> oneshot::Sender<FeedResult<VoteCounts>> {
        let (tx, rx) = oneshot::channel();
        self.held_votes.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl FeedApi for ScriptedApi {
    async fn fetch_page(
        &self,
        signature: &QuerySignature,
        cursor: Option<&str>,
        limit: usize,
    ) -> FeedResult<FeedResponse> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().unwrap().push(cursor.map(str::to_string));
        self.signatures.lock().unwrap().push(signature.clone());

        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }

        let failing = self.failing_fetches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_fetches.store(failing - 1, Ordering::SeqCst);
            return Err(FeedError::status(500, "scripted failure"));
        }

        let posts = self.posts.lock().unwrap().clone();
        let start = match cursor {
            Some(cursor) => posts
                .iter()
                .position(|post| post.id == cursor)
                .map(|index| index + 1)
                .unwrap_or(posts.len()),
            None => 0,
        };
        let data: Vec<Post> = posts.iter().skip(start).take(limit).cloned().collect();
        let has_more = start + data.len() < posts.len();
        let last_id = data.last().map(|post| post.id.clone());
        Ok(FeedResponse {
            data,
            has_more,
            last_id,
        })
    }

    async fn submit_vote(
        &self,
        post_id: &str,
        voter_id: &str,
        vote_type: VoteType,
    ) -> FeedResult<VoteCounts> {
        self.vote_calls.fetch_add(1, Ordering::SeqCst);

        let held = self.held_votes.lock().unwrap().pop_front();
        if let Some(reply) = held {
            return reply
                .await
                .unwrap_or_else(|_| Err(FeedError::fetch("held vote dropped")));
        }
        if self.fail_votes.load(Ordering::SeqCst) {
            return Err(FeedError::status(503, "votes unavailable"));
        }

        let mut posts = self.posts.lock().unwrap();
        let post = posts
            .iter_mut()
            .find(|post| post.id == post_id)
            .ok_or_else(|| FeedError::status(404, "no such post"))?;
        let next = toggle_vote(&post.vote_snapshot(), voter_id, vote_type);
        post.apply_snapshot(&next);
        Ok(VoteCounts {
            upvote_count: post.upvote_count,
            downvote_count: post.downvote_count,
            user_vote: post.vote_of(voter_id),
        })
    }
}
