//! Pagination helper
//!
//! Pure arithmetic turning (limit, page, total_count) into an offset and
//! page metadata. Out-of-range input is clamped, never rejected.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 10;
pub const DEFAULT_PAGE: i64 = 1;

/// Page position reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub current_page: i64,
    pub total_count: i64,
    pub total_count_page: i64,
}

/// Pagination metadata returned next to a page of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageData {
    pub limit: i64,
    pub offset: i64,
    pub page_info: PageInfo,
}

/// Clamped pagination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    limit: i64,
    page: i64,
    total_count: i64,
}

impl Pagination {
    /// `limit` and `page` are clamped to at least 1, `total_count` to at least 0.
    pub fn new(limit: i64, page: i64, total_count: i64) -> Self {
        Self {
            limit: limit.max(1),
            page: page.max(1),
            total_count: total_count.max(0),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Number of pages, at least 1 even for an empty list
    pub fn total_pages(&self) -> i64 {
        let pages = self.total_count.saturating_add(self.limit - 1) / self.limit;
        pages.max(1)
    }

    /// Requested page, clamped to the last page
    pub fn current_page(&self) -> i64 {
        self.page.min(self.total_pages())
    }

    pub fn offset(&self) -> i64 {
        (self.current_page() - 1) * self.limit
    }

    pub fn page_data(&self) -> PageData {
        PageData {
            limit: self.limit,
            offset: self.offset(),
            page_info: PageInfo {
                current_page: self.current_page(),
                total_count: self.total_count,
                total_count_page: self.total_pages(),
            },
        }
    }
}
