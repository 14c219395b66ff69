//! Cursor-based pagination for list endpoints.

use serde::{Deserialize, Serialize};

/// Default page size when `count` is not specified.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Maximum allowed page size.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Query parameters accepted by paginated endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationParams {
    /// Opaque cursor from a previous response.
    pub cursor: Option<String>,
    /// Items per page (default 100, max 1000).
    pub count: Option<u32>,
}

impl PaginationParams {
    /// Effective page size, clamped to `[1, MAX_PAGE_SIZE]`.
    pub fn effective_count(&self) -> u32 {
        self.count.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    /// Offset encoded in the cursor; 0 when absent or unreadable.
    pub fn decode_offset(&self) -> u64 {
        self.cursor.as_deref().and_then(decode_cursor).unwrap_or(0)
    }

    /// Cut one page out of `items`, returning it with the next cursor.
    pub fn page<T>(&self, items: Vec<T>) -> Page<T> {
        let offset = self.decode_offset();
        let count = self.effective_count();
        let items: Vec<T> = items
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(count as usize + 1)
            .collect();
        let has_more = items.len() > count as usize;
        let mut items = items;
        items.truncate(count as usize);
        let cursor = has_more.then(|| encode_cursor(offset + items.len() as u64));
        Page { items, cursor }
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; absent on the last one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Encode an offset as an opaque cursor.
pub fn encode_cursor(offset: u64) -> String {
    hex::encode(offset.to_be_bytes())
}

pub fn decode_cursor(cursor: &str) -> Option<u64> {
    let bytes: [u8; 8] = hex::decode(cursor).ok()?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
