// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Listing cache keys and page codec.
//!
//! Each (limit, offset) window is cached under its own key and tagged into
//! [`LIST_CACHE_TAG`], so a mutation drops every cached page at once.

use std::fmt;
use crate::cache::CacheError;
use crate::item::{ListPage, ListParams};

/// Tag grouping every cached listing page.
pub const LIST_CACHE_TAG: &str = "goods:list";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub limit: i64,
    pub offset: i64,
}

impl From<ListParams> for ListKey {
    fn from(params: ListParams) -> Self {
        Self {
            limit: params.limit,
            offset: params.offset,
        }
    }
}

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", LIST_CACHE_TAG, self.limit, self.offset)
    }
}

pub fn encode_page(page: &ListPage) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(page).map_err(|e| CacheError::Codec(e.to_string()))
}

pub fn decode_page(bytes: &[u8]) -> Result<ListPage, CacheError> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ListMeta;

    #[test]
    fn test_key_includes_every_parameter() {
        let five = ListKey::from(ListParams::new(5, 0));
        let one = ListKey::from(ListParams::new(1, 0));

        assert_eq!(five.to_string(), "goods:list:5:1");
        assert_ne!(five.to_string(), one.to_string());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_page(b"not a page"), Err(CacheError::Codec(_))));
    }

    #[test]
    fn test_page_survives_codec() {
        let page = ListPage {
            meta: ListMeta { total: 0, removed: 0, limit: 10, offset: 1 },
            goods: vec![],
        };
        assert_eq!(decode_page(&encode_page(&page).unwrap()).unwrap(), page);
    }
}
