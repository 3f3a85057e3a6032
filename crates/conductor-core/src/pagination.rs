//! Paging for job listings.

use serde::{Deserialize, Serialize};

/// A request for one page of jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page number.
    pub page: u32,
    /// Items per page, capped at [`PageRequest::MAX_SIZE`].
    pub size: u32,
}

impl PageRequest {
    pub const DEFAULT_SIZE: u32 = 20;
    pub const MAX_SIZE: u32 = 100;

    #[must_use]
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    /// Row offset for SQL `OFFSET`.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.page as u64 * self.size as u64
    }

    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }
}

/// One page of results plus totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(content: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        let size = u64::from(request.size);
        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements,
            total_pages: total_elements.div_ceil(size),
        }
    }

    /// Slices an already filtered and ordered collection.
    #[must_use]
    pub fn from_slice(items: &[T], request: PageRequest) -> Self
    where
        T: Clone,
    {
        let start = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let content = items
            .iter()
            .skip(start)
            .take(request.size as usize)
            .cloned()
            .collect();
        Self::new(content, request, items.len() as u64)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        u64::from(self.page) + 1 < self.total_pages
    }
}
