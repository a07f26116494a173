//! Page/limit query parsing shared by every list endpoint.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// `?page=&limit=` as sent by clients. Both are optional and clamped.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    /// Resolve to a 1-based page and a limit within `1..=max_limit`.
    pub fn resolve(&self, default_limit: i64, max_limit: i64) -> PageWindow {
        let page = self.page.filter(|p| *p >= 1).unwrap_or(1);
        let limit = self
            .limit
            .filter(|l| *l >= 1)
            .unwrap_or(default_limit)
            .min(max_limit);

        PageWindow { page, limit }
    }
}

/// A resolved page, ready to be turned into LIMIT/OFFSET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub limit: i64,
}

impl PageWindow {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn with_total(&self, total: i64) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
            total,
            pages: (total + self.limit - 1) / self.limit,
        }
    }
}

/// Pagination block returned alongside list results.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

/// A page of results.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_missing_or_invalid() {
        let window = PageQuery {
            page: Some(0),
            limit: Some(-5),
        }
        .resolve(10, 100);
        assert_eq!(window, PageWindow { page: 1, limit: 10 });
        assert_eq!(window.offset(), 0);
    }

    #[test]
    fn limit_is_capped() {
        let window = PageQuery {
            page: Some(3),
            limit: Some(5000),
        }
        .resolve(DEFAULT_LIMIT, MAX_LIMIT);
        assert_eq!(window.limit, MAX_LIMIT);
        assert_eq!(window.offset(), 200);
    }

    #[test]
    fn pages_round_up() {
        let window = PageWindow { page: 1, limit: 10 };
        assert_eq!(window.with_total(0).pages, 0);
        assert_eq!(window.with_total(10).pages, 1);
        assert_eq!(window.with_total(11).pages, 2);
    }
}
