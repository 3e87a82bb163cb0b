use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};

const MAX_SEARCH_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Newest,
    Oldest,
    Top,
    Discussed,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::Newest => "newest",
            SortMode::Oldest => "oldest",
            SortMode::Top => "top",
            SortMode::Discussed => "discussed",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = FeedError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "newest" | "new" => Ok(SortMode::Newest),
            "oldest" | "old" => Ok(SortMode::Oldest),
            "top" | "votes" => Ok(SortMode::Top),
            "discussed" | "comments" => Ok(SortMode::Discussed),
            other => Err(FeedError::validation(format!("unknown sort mode '{other}'"))),
        }
    }
}

/// Inclusive calendar range; at least one bound is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    fn validate(&self) -> FeedResult<()> {
        match (self.start, self.end) {
            (None, None) => Err(FeedError::validation("date range has no bounds")),
            (Some(start), Some(end)) if start > end => Err(FeedError::validation(format!(
                "date range starts after it ends ({start} > {end})"
            ))),
            _ => Ok(()),
        }
    }
}

/// The full set of filters and ordering that identifies one feed.
///
/// Two signatures address the same cached pages exactly when they compare
/// equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuerySignature {
    pub search_term: Option<String>,
    pub tag_filter: Option<String>,
    pub author_filter: Option<String>,
    pub date_range: Option<DateRange>,
    pub sort_mode: SortMode,
}

impl QuerySignature {
    pub fn builder() -> QuerySignatureBuilder {
        QuerySignatureBuilder::default()
    }

    /// Rejects partially resolved filter state.
    pub fn validate(&self) -> FeedResult<()> {
        for (name, value) in [
            ("search term", &self.search_term),
            ("tag filter", &self.tag_filter),
            ("author filter", &self.author_filter),
        ] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(FeedError::validation(format!("{name} is blank")));
                }
            }
        }
        if let Some(term) = &self.search_term {
            if term.chars().count() > MAX_SEARCH_CHARS {
                return Err(FeedError::validation(format!(
                    "search term exceeds {MAX_SEARCH_CHARS} characters"
                )));
            }
        }
        if let Some(range) = &self.date_range {
            range.validate()?;
        }
        Ok(())
    }

    /// Query parameters for `GET /posts`, without paging.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(term) = &self.search_term {
            pairs.push(("search", term.clone()));
        }
        if let Some(tag) = &self.tag_filter {
            pairs.push(("tag", tag.clone()));
        }
        if let Some(author) = &self.author_filter {
            pairs.push(("author", author.clone()));
        }
        if let Some(range) = &self.date_range {
            if let Some(start) = range.start {
                pairs.push(("startDate", start.format("%Y-%m-%d").to_string()));
            }
            if let Some(end) = range.end {
                pairs.push(("endDate", end.format("%Y-%m-%d").to_string()));
            }
        }
        pairs.push(("sort", self.sort_mode.as_str().to_string()));
        pairs
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .query_pairs()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        f.write_str(&rendered)
    }
}

#[derive(Debug, Default)]
pub struct QuerySignatureBuilder {
    inner: QuerySignature,
}

impl QuerySignatureBuilder {
    pub fn search(mut self, term: impl AsRef<str>) -> Self {
        self.inner.search_term = non_blank(term.as_ref());
        self
    }

    pub fn tag(mut self, tag: impl AsRef<str>) -> Self {
        self.inner.tag_filter = non_blank(tag.as_ref()).map(|tag| tag.to_lowercase());
        self
    }

    pub fn author(mut self, author: impl AsRef<str>) -> Self {
        self.inner.author_filter = non_blank(author.as_ref());
        self
    }

    pub fn dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.inner.date_range = if start.is_none() && end.is_none() {
            None
        } else {
            Some(DateRange::new(start, end))
        };
        self
    }

    pub fn sort(mut self, sort_mode: SortMode) -> Self {
        self.inner.sort_mode = sort_mode;
        self
    }

    pub fn build(self) -> FeedResult<QuerySignature> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
