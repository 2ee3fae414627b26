//! Page arithmetic for the activity feed.

use serde::{Deserialize, Serialize};

/// Rows per page in the console's activity feed.
pub const DEFAULT_PAGE_SIZE: usize = 7;
pub const MAX_PAGE_SIZE: usize = 500;

/// 1-based page request. Out-of-range values are normalised, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub fn total_pages(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    len.div_ceil(page_size)
}

impl Page {
    pub fn new(page: Option<usize>, page_size: Option<usize>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = match page_size {
            None | Some(0) => DEFAULT_PAGE_SIZE,
            Some(n) => n.min(MAX_PAGE_SIZE),
        };
        Self { page, page_size }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn slice<T: Clone>(&self, items: &[T]) -> Paged<T> {
        let start = self.offset().min(items.len());
        let end = start.saturating_add(self.page_size).min(items.len());
        Paged {
            items: items[start..end].to_vec(),
            page: self.page,
            page_size: self.page_size,
            total_items: items.len(),
            total_pages: total_pages(items.len(), self.page_size),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}
