use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteType::Up => "up",
            VoteType::Down => "down",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = FeedError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" | "upvote" | "+" => Ok(VoteType::Up),
            "down" | "downvote" | "-" => Ok(VoteType::Down),
            other => Err(FeedError::validation(format!(
                "unknown vote type '{other}', expected 'up' or 'down'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub upvote_count: u64,
    #[serde(default)]
    pub downvote_count: u64,
    #[serde(default)]
    pub vote_by_user: BTreeMap<String, VoteType>,
    #[serde(default)]
    pub comment_count: u64,
}

impl Post {
    pub fn score(&self) -> i64 {
        self.upvote_count as i64 - self.downvote_count as i64
    }

    pub fn vote_of(&self, voter_id: &str) -> Option<VoteType> {
        self.vote_by_user.get(voter_id).copied()
    }

    pub fn vote_snapshot(&self) -> VoteSnapshot {
        VoteSnapshot {
            upvote_count: self.upvote_count,
            downvote_count: self.downvote_count,
            vote_by_user: self.vote_by_user.clone(),
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: &VoteSnapshot) {
        self.upvote_count = snapshot.upvote_count;
        self.downvote_count = snapshot.downvote_count;
        self.vote_by_user = snapshot.vote_by_user.clone();
    }
}

/// The vote-bearing part of a post: what an optimistic update writes and
/// what a rollback restores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteSnapshot {
    pub upvote_count: u64,
    pub downvote_count: u64,
    pub vote_by_user: BTreeMap<String, VoteType>,
}

impl VoteSnapshot {
    pub fn vote_of(&self, voter_id: &str) -> Option<VoteType> {
        self.vote_by_user.get(voter_id).copied()
    }
}

/// One page of a feed, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub posts: Vec<Post>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            posts: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.posts.iter().map(|post| post.id.as_str())
    }
}

/// Body of `GET /posts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    #[serde(default)]
    pub data: Vec<Post>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub last_id: Option<String>,
}

impl From<FeedResponse> for Page {
    fn from(response: FeedResponse) -> Self {
        Page {
            posts: response.data,
            next_cursor: response.last_id,
            has_more: response.has_more,
        }
    }
}

/// Body of `POST /posts/:id/vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub vote_type: VoteType,
    pub user_id: String,
}

/// Server-side tallies returned after a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCounts {
    pub upvote_count: u64,
    pub downvote_count: u64,
    #[serde(default)]
    pub user_vote: Option<VoteType>,
}

/// The already-authenticated user, as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn anonymous(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            photo_url: None,
        }
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.uid)
    }
}
