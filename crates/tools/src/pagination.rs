//! Cursor-paginated retrieval under a time horizon.
//!
//! Feed-style upstreams return newest-first pages linked by an opaque
//! cursor. [`paginate`] walks them until one of the stop conditions in
//! [`StopReason`] fires, sleeping between pages so the upstream's rate
//! limit is respected. The engine is generic over the item type: a tool
//! supplies the page fetch and a timestamp extractor.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use quarry_config::RetrievalConfig;
use serde::Serialize;
use tracing::debug;

/// One page from an upstream feed.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The upstream returned a page with no items
    Empty,
    /// A page reached back past the lower bound
    Horizon,
    /// The upstream returned no next cursor
    EndOfData,
    /// The upstream returned a cursor the walk already requested
    Stalled,
    /// The page budget ran out
    MaxPages,
}

/// Parameters of a single walk.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub cursor: Option<String>,
    /// Oldest timestamp of interest (unix seconds, inclusive)
    pub lower_bound: Option<i64>,
    pub max_pages: Option<usize>,
    pub delay: Duration,
}

impl RetrievalParams {
    pub fn new(delay: Duration) -> Self {
        Self {
            cursor: None,
            lower_bound: None,
            max_pages: None,
            delay,
        }
    }

    /// Defaults from the `[retrieval]` config section.
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(Duration::from_millis(config.page_delay_ms)).with_max_pages(config.max_pages)
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_lower_bound(mut self, lower_bound: i64) -> Self {
        self.lower_bound = Some(lower_bound);
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }
}

/// The outcome of a walk: the items inside the horizon plus the cursor
/// to continue from.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalWindow<T> {
    pub cursor: Option<String>,
    pub lower_bound: Option<i64>,
    pub collected: Vec<T>,
    /// The upstream has nothing further to give
    pub exhausted: bool,
    pub stop: StopReason,
    pub pages_fetched: usize,
}

/// Walk a paginated upstream.
///
/// `fetch` is called with the current cursor and `timestamp` maps an item
/// to unix seconds. A fetch error ends the walk and is returned as-is.
pub async fn paginate<T, E, F, Fut, K>(
    params: RetrievalParams,
    mut fetch: F,
    timestamp: K,
) -> Result<RetrievalWindow<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    K: Fn(&T) -> i64,
{
    let mut window = RetrievalWindow {
        cursor: params.cursor,
        lower_bound: params.lower_bound,
        collected: Vec::new(),
        exhausted: false,
        stop: StopReason::EndOfData,
        pages_fetched: 0,
    };

    let mut requested: HashSet<Option<String>> = HashSet::new();

    loop {
        let used = window.cursor.clone();
        requested.insert(used.clone());
        let page = fetch(used.clone()).await?;
        window.pages_fetched += 1;

        if page.items.is_empty() {
            window.exhausted = true;
            window.stop = StopReason::Empty;
            break;
        }

        // A page that hands back its own cursor repeats what the walk
        // already holds; only the first page of a walk is kept.
        let repeats_itself = used.is_some() && page.next_cursor == used;
        if repeats_itself && window.pages_fetched > 1 {
            debug!(cursor = ?used, "Cursor did not advance, dropping repeated page");
            window.exhausted = true;
            window.stop = StopReason::Stalled;
            break;
        }

        let oldest = page.items.iter().map(&timestamp).min();
        let page_len = page.items.len();
        window.collected.extend(page.items);

        if let (Some(bound), Some(oldest)) = (params.lower_bound, oldest) {
            if oldest <= bound {
                window.collected.retain(|item| timestamp(item) >= bound);
                window.cursor = page.next_cursor;
                window.stop = StopReason::Horizon;
                break;
            }
        }

        let Some(next) = page.next_cursor else {
            window.cursor = None;
            window.exhausted = true;
            window.stop = StopReason::EndOfData;
            break;
        };

        if requested.contains(&Some(next.clone())) {
            window.exhausted = true;
            window.stop = StopReason::Stalled;
            break;
        }

        window.cursor = Some(next);

        if params
            .max_pages
            .is_some_and(|max| window.pages_fetched >= max)
        {
            window.stop = StopReason::MaxPages;
            break;
        }

        debug!(
            page = window.pages_fetched,
            items = page_len,
            delay_ms = params.delay.as_millis() as u64,
            "Fetching next page"
        );
        tokio::time::sleep(params.delay).await;
    }

    debug!(
        pages = window.pages_fetched,
        collected = window.collected.len(),
        stop = ?window.stop,
        "Retrieval finished"
    );
    Ok(window)
}
