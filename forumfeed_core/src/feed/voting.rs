use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::FeedApi;
use crate::error::{FeedError, FeedResult};
use crate::feed::cache::FingerprintCache;
use crate::models::{VoteCounts, VoteSnapshot, VoteType};

/// Applies one vote action to a snapshot.
///
/// No prior vote sets it, the same vote retracts it, the opposite vote
/// switches it. Counters only decrement for a vote known to exist and
/// saturate at zero.
pub fn toggle_vote(snapshot: &VoteSnapshot, voter_id: &str, vote_type: VoteType) -> VoteSnapshot {
    let mut next = snapshot.clone();
    match snapshot.vote_of(voter_id) {
        None => {
            next.vote_by_user.insert(voter_id.to_string(), vote_type);
            increment(&mut next, vote_type);
        }
        Some(existing) if existing == vote_type => {
            next.vote_by_user.remove(voter_id);
            decrement(&mut next, vote_type);
        }
        Some(existing) => {
            decrement(&mut next, existing);
            next.vote_by_user.insert(voter_id.to_string(), vote_type);
            increment(&mut next, vote_type);
        }
    }
    next
}

fn increment(snapshot: &mut VoteSnapshot, vote_type: VoteType) {
    match vote_type {
        VoteType::Up => snapshot.upvote_count += 1,
        VoteType::Down => snapshot.downvote_count += 1,
    }
}

fn decrement(snapshot: &mut VoteSnapshot, vote_type: VoteType) {
    match vote_type {
        VoteType::Up => snapshot.upvote_count = snapshot.upvote_count.saturating_sub(1),
        VoteType::Down => snapshot.downvote_count = snapshot.downvote_count.saturating_sub(1),
    }
}

/// Sets one voter's entry back to `prior`, adjusting the counters for that
/// voter only.
fn restore_vote(snapshot: &VoteSnapshot, voter_id: &str, prior: Option<VoteType>) -> VoteSnapshot {
    let mut next = snapshot.clone();
    if let Some(current) = next.vote_by_user.remove(voter_id) {
        decrement(&mut next, current);
    }
    if let Some(prior) = prior {
        next.vote_by_user.insert(voter_id.to_string(), prior);
        increment(&mut next, prior);
    }
    next
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Confirmed { reconciled: bool },
    RolledBack { error: FeedError },
}

/// A speculative vote awaiting the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub target_id: String,
    pub voter_id: String,
    pub vote_type: VoteType,
    pub sequence: u64,
    pub previous: VoteSnapshot,
    pub optimistic: VoteSnapshot,
    pub status: MutationStatus,
}

impl PendingMutation {
    fn confirm(mut self, reconciled: bool) -> Self {
        self.status = MutationStatus::Confirmed { reconciled };
        self
    }

    fn roll_back(mut self, error: FeedError) -> Self {
        self.status = MutationStatus::RolledBack { error };
        self
    }

    /// `current` with this voter's change undone. Other voters' entries and
    /// their share of the counters are kept.
    fn revert(&self, current: &VoteSnapshot) -> VoteSnapshot {
        restore_vote(current, &self.voter_id, self.previous.vote_of(&self.voter_id))
    }

    /// `current` corrected by what the server reported. The server's counts
    /// cannot include votes still pending for other voters, so those are
    /// laid back on top.
    fn reconcile(
        &self,
        current: &VoteSnapshot,
        counts: &VoteCounts,
        others: &[PendingMutation],
    ) -> VoteSnapshot {
        let mut snapshot = current.clone();
        snapshot.upvote_count = counts.upvote_count;
        snapshot.downvote_count = counts.downvote_count;
        if let Some(server_vote) = counts.user_vote {
            snapshot
                .vote_by_user
                .insert(self.voter_id.clone(), server_vote);
        }
        for other in others {
            let voter = other.voter_id.as_str();
            match other.previous.vote_of(voter) {
                Some(prior) => {
                    snapshot.vote_by_user.insert(voter.to_string(), prior);
                }
                None => {
                    snapshot.vote_by_user.remove(voter);
                }
            }
            snapshot = restore_vote(&snapshot, voter, other.optimistic.vote_of(voter));
        }
        snapshot
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The server accepted the vote. `reconciled` is set when its answer
    /// differed from the cached state and replaced it.
    Confirmed { counts: VoteCounts, reconciled: bool },
    /// The same voter voted on the same post again before this one resolved;
    /// its response was ignored.
    Superseded,
}

/// Post id and voter id.
type PendingKey = (String, String);

/// Optimistic voting over cached posts.
#[derive(Clone)]
pub struct VoteEngine {
    api: Arc<dyn FeedApi>,
    cache: FingerprintCache,
    pending: Arc<Mutex<HashMap<PendingKey, PendingMutation>>>,
    next_sequence: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl VoteEngine {
    pub fn new(api: Arc<dyn FeedApi>, cache: FingerprintCache) -> Self {
        Self::with_shutdown(api, cache, CancellationToken::new())
    }

    pub fn with_shutdown(
        api: Arc<dyn FeedApi>,
        cache: FingerprintCache,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            cache,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_sequence: Arc::new(AtomicU64::new(1)),
            shutdown,
        }
    }

    pub async fn pending(&self, post_id: &str, voter_id: &str) -> Option<PendingMutation> {
        self.pending
            .lock()
            .await
            .get(&(post_id.to_string(), voter_id.to_string()))
            .cloned()
    }

    pub async fn apply_vote(
        &self,
        post_id: &str,
        voter_id: &str,
        vote_type: VoteType,
    ) -> FeedResult<VoteOutcome> {
        if voter_id.trim().is_empty() {
            return Err(FeedError::validation("voter id is blank"));
        }

        let sequence = self.begin(post_id, voter_id, vote_type).await?;
        let result = self.api.submit_vote(post_id, voter_id, vote_type).await;

        let key = (post_id.to_string(), voter_id.to_string());
        let mut pending = self.pending.lock().await;
        let mutation = match pending.remove(&key) {
            Some(mutation) if mutation.sequence == sequence => mutation,
            Some(newer) => {
                debug!(post_id, voter_id, sequence, newer = newer.sequence, "ignoring superseded vote response");
                pending.insert(key, newer);
                return Ok(VoteOutcome::Superseded);
            }
            None => return Ok(VoteOutcome::Superseded),
        };
        let teardown = self.shutdown.is_cancelled();

        match result {
            Ok(counts) => {
                let others: Vec<PendingMutation> = pending
                    .values()
                    .filter(|other| other.target_id == post_id)
                    .cloned()
                    .collect();
                let current = match self.cache.find_post(post_id).await {
                    Some(post) => post.vote_snapshot(),
                    None => mutation.optimistic.clone(),
                };
                let server = mutation.reconcile(&current, &counts, &others);
                let reconciled = server != current;
                if reconciled && !teardown {
                    self.cache
                        .update_post(post_id, |post| post.apply_snapshot(&server))
                        .await;
                }
                let mutation = mutation.confirm(reconciled);
                debug!(post_id, voter_id, sequence, status = ?mutation.status, "vote confirmed");
                Ok(VoteOutcome::Confirmed { counts, reconciled })
            }
            Err(error) => {
                if !teardown {
                    self.cache
                        .update_post(post_id, |post| {
                            let reverted = mutation.revert(&post.vote_snapshot());
                            post.apply_snapshot(&reverted);
                        })
                        .await;
                }
                let mutation = mutation.roll_back(error.clone());
                warn!(post_id, voter_id, sequence, status = ?mutation.status, "vote rolled back");
                Err(error)
            }
        }
    }

    /// Writes the optimistic snapshot and registers the mutation, replacing
    /// any older pending mutation by the same voter on the post.
    async fn begin(&self, post_id: &str, voter_id: &str, vote_type: VoteType) -> FeedResult<u64> {
        let mut pending = self.pending.lock().await;
        let current = self
            .cache
            .find_post(post_id)
            .await
            .ok_or_else(|| FeedError::UnknownPost(post_id.to_string()))?;

        let previous = current.vote_snapshot();
        let optimistic = toggle_vote(&previous, voter_id, vote_type);
        self.cache
            .update_post(post_id, |post| post.apply_snapshot(&optimistic))
            .await;

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let mutation = PendingMutation {
            target_id: post_id.to_string(),
            voter_id: voter_id.to_string(),
            vote_type,
            sequence,
            previous,
            optimistic,
            status: MutationStatus::Pending,
        };
        if let Some(older) = pending.insert((post_id.to_string(), voter_id.to_string()), mutation) {
            info!(post_id, voter_id, superseded = older.sequence, sequence, "vote superseded by newer action");
        }
        Ok(sequence)
    }
}
