use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use forumfeed_core::feed::toggle_vote;
use forumfeed_core::models::{FeedResponse, VoteRequest};
use forumfeed_core::{
    FeedApi, FeedConfig, FeedError, FeedSession, HttpFeedApi, Identity, Post, QuerySignature,
    SortMode, VoteCounts, VoteOutcome, VoteType,
};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct StubBackend {
    posts: Arc<Mutex<Vec<Post>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    reject_votes: Arc<AtomicBool>,
}

struct TestServer {
    backend: StubBackend,
    server: tokio::task::JoinHandle<()>,
    base_url: String,
}

impl TestServer {
    async fn start(posts: Vec<Post>) -> Self {
        let backend = StubBackend::default();
        *backend.posts.lock().unwrap() = posts;

        let router = Router::new()
            .route("/posts", get(list_posts))
            .route("/posts/:id/vote", post(vote))
            .with_state(backend.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            backend,
            server,
            base_url: format!("http://{addr}"),
        }
    }

    fn config(&self, page_size: usize) -> FeedConfig {
        FeedConfig {
            api_url: self.base_url.clone(),
            page_size,
            ..FeedConfig::default()
        }
    }

    fn queries(&self) -> Vec<HashMap<String, String>> {
        self.backend.queries.lock().unwrap().clone()
    }

    async fn shutdown(self) {
        self.server.abort();
        let _ = self.server.await;
    }
}

async fn list_posts(
    State(backend): State<StubBackend>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<FeedResponse> {
    backend.queries.lock().unwrap().push(params.clone());
    let posts = backend.posts.lock().unwrap().clone();

    let matching: Vec<Post> = posts
        .into_iter()
        .filter(|post| match params.get("tag") {
            Some(tag) => post.tags.contains(tag),
            None => true,
        })
        .collect();
    let start = params
        .get("lastId")
        .and_then(|last| matching.iter().position(|post| &post.id == last))
        .map(|index| index + 1)
        .unwrap_or(0);
    let limit = params
        .get("limit")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(10);
    let data: Vec<Post> = matching.iter().skip(start).take(limit).cloned().collect();
    let has_more = start + data.len() < matching.len();
    let last_id = data.last().map(|post| post.id.clone());

    Json(FeedResponse {
        data,
        has_more,
        last_id,
    })
}

async fn vote(
    State(backend): State<StubBackend>,
    Path(post_id): Path<String>,
    Json(request): Json<VoteRequest>,
) -> Response {
    if backend.reject_votes.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "voting is paused").into_response();
    }
    let mut posts = backend.posts.lock().unwrap();
    let Some(post) = posts.iter_mut().find(|post| post.id == post_id) else {
        return (StatusCode::NOT_FOUND, "no such post").into_response();
    };
    let next = toggle_vote(&post.vote_snapshot(), &request.user_id, request.vote_type);
    post.apply_snapshot(&next);
    Json(VoteCounts {
        upvote_count: post.upvote_count,
        downvote_count: post.downvote_count,
        user_vote: post.vote_of(&request.user_id),
    })
    .into_response()
}

fn sample_post(id: &str, tags: &[&str]) -> Post {
    Post {
        id: id.to_string(),
        author_id: "author-1".to_string(),
        title: format!("Post {id}"),
        body: "hello world".to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        upvote_count: 0,
        downvote_count: 0,
        vote_by_user: Default::default(),
        comment_count: 2,
    }
}

#[tokio::test]
async fn pages_through_a_filtered_feed_over_http() {
    let server = TestServer::start(vec![
        sample_post("p1", &["rust"]),
        sample_post("p2", &["meta"]),
        sample_post("p3", &["rust"]),
        sample_post("p4", &["rust"]),
    ])
    .await;
    let session = FeedSession::connect(&server.config(2)).expect("session");
    let sig = QuerySignature::builder()
        .tag("Rust")
        .sort(SortMode::Top)
        .build()
        .unwrap();

    let first = session.load_next(&sig).await.expect("first page");
    assert_eq!(first.next_cursor.as_deref(), Some("p3"));
    assert!(first.has_more);

    let second = session.load_next(&sig).await.expect("second page");
    assert_eq!(second.posts.len(), 1);
    assert!(!second.has_more);

    let empty = session.load_next(&sig).await.expect("terminal page");
    assert!(empty.is_empty());

    let queries = server.queries();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].get("tag").map(String::as_str), Some("rust"));
    assert_eq!(queries[0].get("sort").map(String::as_str), Some("top"));
    assert_eq!(queries[0].get("limit").map(String::as_str), Some("2"));
    assert_eq!(queries[0].get("lastId"), None);
    assert_eq!(queries[1].get("lastId").map(String::as_str), Some("p3"));

    let ids: Vec<String> = session.posts(&sig).await.into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["p1", "p3", "p4"]);

    session.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn votes_confirm_and_roll_back_over_http() {
    let server = TestServer::start(vec![sample_post("p1", &[]), sample_post("p2", &[])]).await;
    let session = FeedSession::connect(&server.config(10)).expect("session");
    let sig = QuerySignature::default();
    session.load_next(&sig).await.expect("page");
    let voter = Identity::anonymous("u1");

    let outcome = session.vote(&voter, "p1", VoteType::Up).await.expect("vote");
    assert_eq!(
        outcome,
        VoteOutcome::Confirmed {
            counts: VoteCounts {
                upvote_count: 1,
                downvote_count: 0,
                user_vote: Some(VoteType::Up),
            },
            reconciled: false,
        }
    );

    let before = session.posts(&sig).await[0].vote_snapshot();
    server.backend.reject_votes.store(true, Ordering::SeqCst);
    let err = session
        .vote(&voter, "p1", VoteType::Down)
        .await
        .expect_err("vote should fail");
    assert_eq!(err, FeedError::status(503, "voting is paused"));
    assert_eq!(session.posts(&sig).await[0].vote_snapshot(), before);

    session.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn missing_routes_surface_as_fetch_errors() {
    let server = TestServer::start(vec![]).await;
    let api = HttpFeedApi::new(format!("{}/v2", server.base_url), Duration::from_secs(5))
        .expect("client");

    let err = api
        .fetch_page(&QuerySignature::default(), None, 5)
        .await
        .expect_err("unknown route");
    match err {
        FeedError::Fetch { status, .. } => assert_eq!(status, Some(404)),
        other => panic!("unexpected error: {other:?}"),
    }

    server.shutdown().await;
}
