use serde::{Deserialize, Serialize};

/// Which tier served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    #[serde(rename = "redis")]
    Redis,
    #[serde(rename = "mongodb")]
    Mongodb,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Redis => "redis",
            DataSource::Mongodb => "mongodb",
        }
    }
}

/// Sort applied to a room listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortSpec {
    pub field: String,
    pub order: String,
}

/// Pagination metadata attached to every listing response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageMeta {
    pub total: u64,
    pub page: u64,
    #[serde(rename = "pageSize")]
    pub page_size: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    #[serde(rename = "currentCount")]
    pub current_count: u64,
    pub sort: SortSpec,
    pub source: DataSource,
}

impl PageMeta {
    pub fn new(
        total: u64,
        page: u64,
        page_size: u64,
        current_count: u64,
        sort: SortSpec,
        source: DataSource,
    ) -> Self {
        let total_pages = if page_size == 0 { 0 } else { total.div_ceil(page_size) };
        Self {
            total,
            page,
            page_size,
            total_pages,
            has_more: (page + 1) * page_size < total,
            current_count,
            sort,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort() -> SortSpec {
        SortSpec { field: "createdAt".into(), order: "desc".into() }
    }

    #[test]
    fn total_pages_rounds_up() {
        let meta = PageMeta::new(21, 0, 10, 10, sort(), DataSource::Redis);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_more);
    }

    #[test]
    fn last_page_has_no_more() {
        let meta = PageMeta::new(21, 2, 10, 1, sort(), DataSource::Mongodb);
        assert!(!meta.has_more);
        assert_eq!(meta.current_count, 1);
    }

    #[test]
    fn empty_listing() {
        let meta = PageMeta::new(0, 0, 10, 0, sort(), DataSource::Redis);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_more);
    }
}
