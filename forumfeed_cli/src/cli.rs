use std::io::{self, Write};

use anyhow::{anyhow, Result};
use forumfeed_core::{FeedSession, Identity, Post, QuerySignature, VoteOutcome, VoteType};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Interactive loop over one feed: paging, voting and refresh notices.
pub async fn run_browser(
    session: &FeedSession,
    signature: QuerySignature,
    voter: Option<Identity>,
) -> Result<()> {
    let mut browser = Browser {
        session,
        signature,
        voter,
        shown: 0,
    };

    println!("Browsing {}. Type 'help' for a list of commands.", browser.signature);
    browser.more().await?;
    session.watch(&browser.signature).await;

    let mut notices = session.notices();
    let printer = tokio::spawn(async move {
        while notices.changed().await.is_ok() {
            let notice = notices.borrow_and_update().clone();
            if let Some(notice) = notice {
                println!(
                    "\n** {} new post(s) since {}. Type 'refresh' to show them. **",
                    notice.new_items,
                    notice.detected_at.format("%H:%M:%S")
                );
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("feed> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        match browser.handle_command(&tokens).await {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => println!("Error: {err:#}"),
        }
    }

    session.unwatch().await;
    printer.abort();
    Ok(())
}

struct Browser<'a> {
    session: &'a FeedSession,
    signature: QuerySignature,
    voter: Option<Identity>,
    shown: usize,
}

enum LoopAction {
    Continue,
    Exit,
}

impl Browser<'_> {
    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let command = tokens[0].as_str();
        match command {
            "help" | "?" => {
                print_help();
                Ok(LoopAction::Continue)
            }
            "more" | "m" => {
                self.more().await?;
                Ok(LoopAction::Continue)
            }
            "list" | "ls" => {
                self.shown = 0;
                self.print_new().await;
                Ok(LoopAction::Continue)
            }
            "up" | "down" => {
                let post_id = tokens
                    .get(1)
                    .ok_or_else(|| anyhow!("usage: {command} <post-id>"))?;
                let vote: VoteType = command.parse()?;
                self.vote(post_id, vote).await?;
                Ok(LoopAction::Continue)
            }
            "refresh" | "r" => {
                self.session.refresh(&self.signature).await?;
                self.shown = 0;
                self.print_new().await;
                Ok(LoopAction::Continue)
            }
            "whoami" => {
                match &self.voter {
                    Some(voter) => println!("Voting as {} ({})", voter.label(), voter.uid),
                    None => println!("Read-only: start with --user to vote"),
                }
                Ok(LoopAction::Continue)
            }
            "quit" | "exit" | "q" => Ok(LoopAction::Exit),
            other => {
                println!("Unknown command '{other}'. Type 'help'.");
                Ok(LoopAction::Continue)
            }
        }
    }

    async fn more(&mut self) -> Result<()> {
        if !self.session.has_more(&self.signature).await {
            println!("-- end of feed --");
            return Ok(());
        }
        self.session.load_next(&self.signature).await?;
        self.print_new().await;
        Ok(())
    }

    async fn print_new(&mut self) {
        let posts = self.session.posts(&self.signature).await;
        let voter_id = self.voter.as_ref().map(|voter| voter.uid.as_str());
        for post in posts.iter().skip(self.shown) {
            println!("{}", render_post(post, voter_id));
        }
        self.shown = posts.len();
    }

    async fn vote(&mut self, post_id: &str, vote: VoteType) -> Result<()> {
        let voter = self
            .voter
            .as_ref()
            .ok_or_else(|| anyhow!("voting requires --user"))?;
        match self.session.vote(voter, post_id, vote).await? {
            VoteOutcome::Confirmed { reconciled: true, .. } => {
                println!("Vote recorded (counts updated from server).")
            }
            VoteOutcome::Confirmed { .. } => println!("Vote recorded."),
            VoteOutcome::Superseded => println!("Vote replaced by a newer one."),
        }
        if let Some(post) = self.session.cache().find_post(post_id).await {
            println!("{}", render_post(&post, Some(&voter.uid)));
        }
        Ok(())
    }
}

fn print_help() {
    println!("Commands:");
    println!("  more | m           load the next page");
    println!("  list | ls          print every loaded post");
    println!("  up <post-id>       upvote (again to retract)");
    println!("  down <post-id>     downvote (again to retract)");
    println!("  refresh | r        reload from the newest posts");
    println!("  whoami             show the voting identity");
    println!("  quit | exit | q    leave");
}

/// One-line summary of a post, marking the viewer's own vote.
pub fn render_post(post: &Post, voter_id: Option<&str>) -> String {
    let marker = match voter_id.and_then(|voter| post.vote_of(voter)) {
        Some(VoteType::Up) => "^",
        Some(VoteType::Down) => "v",
        None => " ",
    };
    let tags = if post.tags.is_empty() {
        String::new()
    } else {
        format!(
            " [{}]",
            post.tags.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    };
    format!(
        "{marker} {:>4} (+{}/-{}) {:<12} {}{} by {} · {} comments · {}",
        post.score(),
        post.upvote_count,
        post.downvote_count,
        post.id,
        post.title,
        tags,
        post.author_id,
        post.comment_count,
        post.created_at.format("%Y-%m-%d %H:%M")
    )
}
