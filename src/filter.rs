//! Episode list filtering, sorting and pagination math.
//!
//! An [`EpisodeFilter`] arrives from the presentation layer with whatever the
//! caller sent. [`EpisodeFilter::normalize`] turns it into a
//! [`NormalizedFilter`] with bounded values, which is the only form the query
//! planner accepts. [`PageMeta::compute`] derives navigation numbers from the
//! matching row count.

use crate::status::DownloadStatus;
use crate::types::{FeedId, TagId};
use serde::{Deserialize, Serialize};

/// Page number used when the request gives none or a non-positive one
pub const DEFAULT_PAGE: i64 = 1;

/// Page size used when the request gives none or a non-positive one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Episode ordering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeSort {
    /// Oldest first
    ReleaseAsc,
    /// Newest first
    #[default]
    ReleaseDesc,
    /// Shortest first
    DurationAsc,
    /// Longest first
    DurationDesc,
}

impl EpisodeSort {
    /// Parse a sort key, falling back to [`EpisodeSort::ReleaseDesc`] for empty or unknown keys
    pub fn parse_or_default(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "release_asc" => EpisodeSort::ReleaseAsc,
            "release_desc" => EpisodeSort::ReleaseDesc,
            "duration_asc" => EpisodeSort::DurationAsc,
            "duration_desc" => EpisodeSort::DurationDesc,
            _ => EpisodeSort::default(),
        }
    }

    /// Sort key as accepted by [`EpisodeSort::parse_or_default`]
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeSort::ReleaseAsc => "release_asc",
            EpisodeSort::ReleaseDesc => "release_desc",
            EpisodeSort::DurationAsc => "duration_asc",
            EpisodeSort::DurationDesc => "duration_desc",
        }
    }

    /// SQL ORDER BY clause; ties break on id in the same direction
    pub fn order_by(self) -> &'static str {
        match self {
            EpisodeSort::ReleaseAsc => "pub_date ASC, id ASC",
            EpisodeSort::ReleaseDesc => "pub_date DESC, id DESC",
            EpisodeSort::DurationAsc => "duration ASC, id ASC",
            EpisodeSort::DurationDesc => "duration DESC, id DESC",
        }
    }
}

/// Episode list request as sent by a caller
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeFilter {
    /// 1-based page number; non-positive means first page
    pub page: i64,
    /// Rows per page; non-positive means the default size
    pub page_size: i64,
    /// Sort key (`release_desc`, `release_asc`, `duration_desc`, `duration_asc`)
    pub sort: String,
    /// Case-insensitive substring matched against title or summary
    pub query: Option<String>,
    /// Exact download status
    pub status: Option<DownloadStatus>,
    /// `true`: downloaded only; `false`: everything not downloaded
    pub downloaded: Option<bool>,
    /// Exact played flag
    pub played: Option<bool>,
    /// Restrict to these feeds (ignored when empty)
    pub feed_ids: Vec<FeedId>,
    /// Restrict to feeds carrying any of these tags (ignored when empty)
    pub tag_ids: Vec<TagId>,
}

/// A filter with defaults applied and bounds enforced
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedFilter {
    /// 1-based page number, at least 1
    pub page: i64,
    /// Rows per page, at least 1
    pub page_size: i64,
    /// Resolved ordering
    pub sort: EpisodeSort,
    /// Trimmed, non-empty text query
    pub query: Option<String>,
    /// Exact download status
    pub status: Option<DownloadStatus>,
    /// Downloaded / not-downloaded split
    pub downloaded: Option<bool>,
    /// Exact played flag
    pub played: Option<bool>,
    /// Feed membership
    pub feed_ids: Vec<FeedId>,
    /// Tag membership
    pub tag_ids: Vec<TagId>,
}

impl EpisodeFilter {
    /// Apply defaults. Total and pure: every input yields a usable filter.
    pub fn normalize(self) -> NormalizedFilter {
        let query = self
            .query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        NormalizedFilter {
            page: if self.page <= 0 { DEFAULT_PAGE } else { self.page },
            page_size: if self.page_size <= 0 {
                DEFAULT_PAGE_SIZE
            } else {
                self.page_size
            },
            sort: EpisodeSort::parse_or_default(&self.sort),
            query,
            status: self.status,
            downloaded: self.downloaded,
            played: self.played,
            feed_ids: self.feed_ids,
            tag_ids: self.tag_ids,
        }
    }
}

impl NormalizedFilter {
    /// Rows to skip before this page
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// Navigation numbers for one page; 0 means "none"
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Current page
    pub page: i64,
    /// Rows per page
    pub page_size: i64,
    /// Rows matching the filter across all pages
    pub total_count: i64,
    /// `ceil(total_count / page_size)`, 0 when nothing matches
    pub total_pages: i64,
    /// `page + 1`, or 0 on the last page and beyond
    pub next_page: i64,
    /// `page - 1`, or 0 on the first page
    pub previous_page: i64,
}

impl PageMeta {
    /// Derive navigation from a normalized page request and the matching count.
    ///
    /// A page past the end is not an error; it simply has no next page.
    pub fn compute(page: i64, page_size: i64, total_count: i64) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_count = total_count.max(0);
        let total_pages = total_count / page_size + i64::from(total_count % page_size != 0);

        PageMeta {
            page,
            page_size,
            total_count,
            total_pages,
            next_page: if page < total_pages { page + 1 } else { 0 },
            previous_page: if page > 1 { page - 1 } else { 0 },
        }
    }
}

/// One page of results plus navigation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows on this page
    pub items: Vec<T>,
    /// Navigation numbers
    pub meta: PageMeta,
}
