use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tweet {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub text: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub tweet_id: i64,
    pub user_id: i64,
    pub username: String,
    pub text: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Catalog entry a reaction points at.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Status {
    #[serde(skip_serializing)]
    pub id: i64,
    pub slug: String,
    #[serde(rename = "name")]
    pub display_name: String,
}

/// One page of a listing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub count: i64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<T>,
}

pub const MAX_PAGE_SIZE: u32 = 100;

/// Page-number request; `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>, default_size: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(default_size)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }

    pub fn wrap<T>(&self, count: i64, results: Vec<T>) -> Page<T> {
        Page {
            count,
            page: self.page,
            page_size: self.page_size,
            results,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None, 10)
    }
}
