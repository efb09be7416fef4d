use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category {
    pub category: String,
    pub sub_category: Option<String>,
}

impl Category {
    pub fn new(category: impl Into<String>, sub_category: Option<String>) -> Self {
        Self {
            category: category.into(),
            sub_category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dish {
    /// Identity key for upserts, only unique within one restaurant.
    pub name: String,
    pub category: Category,
    pub description: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restaurant {
    /// Selects the sink partition.
    pub name: String,
    pub dishes: Vec<Dish>,
}

/// One top-level menu link found on a restaurant landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCategory {
    pub label: String,
    pub source_url: String,
}

/// Raw page source as returned by a fetch session.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: String,
    pub html: String,
}

impl PageContent {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}
