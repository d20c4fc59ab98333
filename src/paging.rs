use std::collections::{HashSet, VecDeque};
use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::GatewayResult;

/// One upstream object flowing out of a listing endpoint, keyed by the id
/// used for de-duplication across pages.
#[derive(Debug, Clone)]
pub struct PagedItem {
    pub id: String,
    pub json: Value,
}

/// One fetched page: the items in upstream order plus the cursor for the
/// next page, if the upstream offered one.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<PagedItem>,
    pub next_cursor: Option<String>,
}

/// Lazy, bounded pull over a cursor-paginated upstream listing.
///
/// The driver owns its cursor, its de-duplication set and its page buffer.
/// It stops after `max_items` emissions, when the upstream stops handing out
/// cursors, or when the cursor stagnates (same value twice in a row). It is
/// single-consumer; to restart, build a new driver.
pub struct PageStream<F, Fut>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = GatewayResult<Page>>,
{
    fetch: F,
    cursor: String,
    buffer: VecDeque<PagedItem>,
    seen: HashSet<String>,
    emitted: usize,
    max_items: usize,
    done: bool,
}

impl<F, Fut> PageStream<F, Fut>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = GatewayResult<Page>>,
{
    pub fn new(max_items: usize, fetch: F) -> Self {
        Self {
            fetch,
            cursor: String::new(),
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            emitted: 0,
            max_items: max_items.max(1),
            done: false,
        }
    }

    /// Next item, or `None` once the stream is exhausted. A fetch error is
    /// yielded once and terminates the stream.
    pub async fn next(&mut self) -> Option<GatewayResult<PagedItem>> {
        loop {
            if self.emitted >= self.max_items {
                return None;
            }
            if let Some(item) = self.buffer.pop_front() {
                self.emitted += 1;
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }

            let page = match (self.fetch)(self.cursor.clone()).await {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            for item in page.items {
                if self.seen.insert(item.id.clone()) {
                    self.buffer.push_back(item);
                }
            }
            match page.next_cursor {
                Some(next) if next != self.cursor => self.cursor = next,
                _ => self.done = true,
            }
            if self.done && self.buffer.is_empty() {
                return None;
            }
        }
    }

    /// Drains the stream into a vector. The first error aborts the drain.
    pub async fn collect_all(mut self) -> GatewayResult<Vec<PagedItem>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

/// Boxed fetch shape used by the endpoint adapters so streams can be passed
/// around without naming closure types.
pub type BoxPageFetcher =
    Box<dyn FnMut(String) -> BoxFuture<'static, GatewayResult<Page>> + Send>;
pub type BoxPageStream = PageStream<BoxPageFetcher, BoxFuture<'static, GatewayResult<Page>>>;
