//! Paginated access to the Evento feeds.

pub mod client;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{EventoError, Result};
use crate::models::import::ImportKind;

pub use client::EventoClient;

/// Position in a paginated feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub skip: u32,
    pub take: u32,
}

/// One page of raw feed records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub records: Vec<serde_json::Value>,
    pub has_more: bool,
}

/// Source of raw Evento records.
///
/// "Not found" on a direct fetch is `Ok(None)`; every other failure to talk
/// to the feed is a communication fault.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_page(&self, kind: ImportKind, cursor: &PageCursor) -> Result<FeedPage>;
    async fn fetch_by_id(&self, kind: ImportKind, evento_id: i64)
        -> Result<Option<serde_json::Value>>;
}

/// Walks a feed page by page until it reports no more data.
pub struct FeedPager<'a> {
    source: &'a dyn FeedSource,
    kind: ImportKind,
    cursor: PageCursor,
    max_pages: u32,
    pages_read: u32,
    done: bool,
}

impl<'a> FeedPager<'a> {
    /// `max_pages == 0` means unlimited.
    pub fn new(source: &'a dyn FeedSource, kind: ImportKind, page_size: u32, max_pages: u32) -> Self {
        Self {
            source,
            kind,
            cursor: PageCursor {
                skip: 0,
                take: page_size,
            },
            max_pages,
            pages_read: 0,
            done: false,
        }
    }

    /// Fetch the next page, or `None` once the feed is exhausted.
    ///
    /// Exceeding the page ceiling is a communication fault so that a
    /// truncated feed is never mistaken for a complete one.
    pub async fn next_page(&mut self) -> Result<Option<FeedPage>> {
        if self.done {
            return Ok(None);
        }
        if self.max_pages != 0 && self.pages_read >= self.max_pages {
            return Err(EventoError::Communication(format!(
                "{} feed still reports more data after {} pages",
                self.kind, self.max_pages
            )));
        }

        let page = self.source.fetch_page(self.kind, &self.cursor).await?;
        self.pages_read += 1;
        debug!(
            kind = %self.kind,
            skip = self.cursor.skip,
            records = page.records.len(),
            has_more = page.has_more,
            "Fetched feed page"
        );

        // An empty page that still claims more data is a broken feed.
        if page.has_more && page.records.is_empty() {
            return Err(EventoError::Communication(format!(
                "{} feed returned an empty page at skip {} but reports more data",
                self.kind, self.cursor.skip
            )));
        }
        if !page.has_more {
            self.done = true;
        }
        self.cursor.skip = self.cursor.skip.saturating_add(self.cursor.take);
        Ok(Some(page))
    }

    pub fn pages_read(&self) -> u32 {
        self.pages_read
    }
}
