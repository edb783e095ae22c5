//! Cursor-based pagination
//!
//! Airtable list endpoints return an opaque `offset` token while more pages
//! remain. [`paginate`] turns a page-fetching closure into a lazy stream that
//! follows those tokens until none is returned.
//!
//! Safety mechanisms:
//! - Maximum page count to prevent infinite loops
//! - Repeated cursor detection

use futures_util::stream::{self, Stream};
use std::collections::HashSet;
use std::future::Future;
use tracing::debug;

use super::{FetcherError, FetcherResult};

/// Maximum number of pages followed for one listing
pub const MAX_PAGES: u32 = 100_000;

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Cursor for the next page, `None` on the last page
    pub offset: Option<String>,
}

enum Cursor {
    Next(Option<String>),
    Fail(FetcherError),
    Done,
}

struct State<F> {
    fetch_page: F,
    cursor: Cursor,
    pages: u32,
    seen: HashSet<String>,
    max_pages: u32,
}

/// Follow offset cursors lazily.
///
/// # Arguments
/// * `fetch_page` - Fetches one page given the cursor (`None` for the first page)
///
/// # Returns
/// Stream of `(page number, items)`; an error ends the stream
pub fn paginate<T, F, Fut>(fetch_page: F) -> impl Stream<Item = FetcherResult<(u32, Vec<T>)>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = FetcherResult<Page<T>>>,
{
    paginate_with_limit(fetch_page, MAX_PAGES)
}

/// [`paginate`] with an explicit page ceiling
pub fn paginate_with_limit<T, F, Fut>(
    fetch_page: F,
    max_pages: u32,
) -> impl Stream<Item = FetcherResult<(u32, Vec<T>)>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = FetcherResult<Page<T>>>,
{
    let state = State {
        fetch_page,
        cursor: Cursor::Next(None),
        pages: 0,
        seen: HashSet::new(),
        max_pages,
    };

    stream::unfold(state, |mut state| async move {
        let offset = match std::mem::replace(&mut state.cursor, Cursor::Done) {
            Cursor::Done => return None,
            Cursor::Fail(e) => return Some((Err(e), state)),
            Cursor::Next(offset) => offset,
        };

        if state.pages >= state.max_pages {
            let e = FetcherError::Pagination(format!(
                "Max pages ({}) exceeded - possible cursor loop",
                state.max_pages
            ));
            return Some((Err(e), state));
        }

        match (state.fetch_page)(offset).await {
            Err(e) => Some((Err(e), state)),
            Ok(page) => {
                state.pages += 1;
                let number = state.pages;
                debug!(page = number, items = page.items.len(), "Page received");

                state.cursor = match page.offset {
                    None => Cursor::Done,
                    Some(next) if !state.seen.insert(next.clone()) => {
                        Cursor::Fail(FetcherError::Pagination(format!(
                            "Cursor '{next}' returned twice"
                        )))
                    }
                    Some(next) => Cursor::Next(Some(next)),
                };

                Some((Ok((number, page.items)), state))
            }
        }
    })
}
