mod cli;

use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use forumfeed_core::{telemetry, FeedConfig, FeedSession, Identity, QuerySignature, SortMode, VoteType};

#[derive(Parser)]
#[command(author, version, about = "Terminal client for forum feeds")]
struct Args {
    /// TOML config file (defaults to $FORUMFEED_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the feed API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log cache and pagination activity (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print one or more pages of a feed
    List {
        #[command(flatten)]
        feed: FeedArgs,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Cast a vote on a post found in the feed
    Vote {
        post_id: String,
        vote: VoteType,
        /// Voter id supplied by the identity provider
        #[arg(long)]
        user: String,
        #[command(flatten)]
        feed: FeedArgs,
    },
    /// Interactive feed browser with background refresh
    Browse {
        #[command(flatten)]
        feed: FeedArgs,
        /// Voter id used for 'up' and 'down'
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(ClapArgs, Clone, Default)]
struct FeedArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long)]
    author: Option<String>,
    /// Earliest creation date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,
    /// Latest creation date (YYYY-MM-DD)
    #[arg(long)]
    until: Option<NaiveDate>,
    #[arg(long, default_value = "newest")]
    sort: SortMode,
}

impl FeedArgs {
    fn signature(&self) -> Result<QuerySignature> {
        let mut builder = QuerySignature::builder()
            .dates(self.since, self.until)
            .sort(self.sort);
        if let Some(term) = &self.search {
            builder = builder.search(term);
        }
        if let Some(tag) = &self.tag {
            builder = builder.tag(tag);
        }
        if let Some(author) = &self.author {
            builder = builder.author(author);
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.verbose);

    let mut config = FeedConfig::load(args.config.as_deref())?;
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }
    let session = FeedSession::connect(&config)?;

    let command = args.command.unwrap_or(Command::Browse {
        feed: FeedArgs::default(),
        user: None,
    });
    let result = match command {
        Command::List { feed, pages } => list(&session, &feed.signature()?, pages).await,
        Command::Vote {
            post_id,
            vote,
            user,
            feed,
        } => vote_once(&session, &feed.signature()?, &post_id, vote, &Identity::anonymous(user)).await,
        Command::Browse { feed, user } => {
            cli::run_browser(&session, feed.signature()?, user.map(Identity::anonymous)).await
        }
    };
    session.close().await;
    result
}

async fn list(session: &FeedSession, signature: &QuerySignature, pages: usize) -> Result<()> {
    for _ in 0..pages.max(1) {
        if !session.has_more(signature).await {
            break;
        }
        session.load_next(signature).await?;
    }
    let posts = session.posts(signature).await;
    if posts.is_empty() {
        println!("No posts match {signature}.");
    }
    for post in &posts {
        println!("{}", cli::render_post(post, None));
    }
    if session.has_more(signature).await {
        println!("-- more available --");
    }
    Ok(())
}

async fn vote_once(
    session: &FeedSession,
    signature: &QuerySignature,
    post_id: &str,
    vote: VoteType,
    voter: &Identity,
) -> Result<()> {
    while session.cache().find_post(post_id).await.is_none() {
        if !session.has_more(signature).await {
            bail!("post {post_id} not found in feed {signature}");
        }
        session.load_next(signature).await?;
    }
    let outcome = session.vote(voter, post_id, vote).await?;
    tracing::debug!(?outcome, "vote resolved");
    if let Some(post) = session.cache().find_post(post_id).await {
        println!("{}", cli::render_post(&post, Some(&voter.uid)));
    }
    Ok(())
}
