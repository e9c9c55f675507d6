use sandchest_core::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// A page of rows plus an opaque cursor for the next page, or `None` once
/// the caller has reached the end of the result set.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self { rows, next_cursor: None }
    }
}

/// Clamps a client-supplied page size to `[1, MAX_PAGE_LIMIT]`, defaulting to
/// `DEFAULT_PAGE_LIMIT` when absent.
pub fn normalize_limit(limit: Option<u32>) -> u32 {
    match limit {
        None => DEFAULT_PAGE_LIMIT,
        Some(0) => DEFAULT_PAGE_LIMIT,
        Some(n) => n.min(MAX_PAGE_LIMIT),
    }
}

/// Builds `{rows, next_cursor}` from a page fetched with `limit + 1` rows:
/// if the extra row is present, it is dropped and its id becomes the cursor.
pub fn paginate<T>(mut rows: Vec<T>, limit: u32, id_of: impl Fn(&T) -> String) -> Page<T> {
    let limit = limit as usize;
    if rows.len() > limit {
        rows.truncate(limit);
        let next_cursor = rows.last().map(&id_of);
        Page { rows, next_cursor }
    } else {
        Page { rows, next_cursor: None }
    }
}
