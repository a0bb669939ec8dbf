use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    DEFAULT_PAGE
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl PageRequest {
    /// Zero values fall back to the defaults; page size is capped.
    pub fn normalized(self) -> Self {
        Self {
            page: if self.page == 0 { DEFAULT_PAGE } else { self.page },
            page_size: match self.page_size {
                0 => DEFAULT_PAGE_SIZE,
                n => n.min(MAX_PAGE_SIZE),
            },
        }
    }

    pub fn apply<T>(self, all: Vec<T>) -> Page<T> {
        let req = self.normalized();
        let total = all.len();
        let items = all
            .into_iter()
            .skip((req.page - 1) * req.page_size)
            .take(req.page_size)
            .collect();
        Page {
            items,
            meta: PageMeta {
                page: req.page,
                page_size: req.page_size,
                total,
            },
        }
    }
}
