use scraper::Selector;

use crate::config::PageStructure;
use crate::error::SelectorError;

/// Compiled form of [`PageStructure`], built once at startup.
#[derive(Debug)]
pub struct PageSelectors {
    pub title: Selector,
    pub category_link: Selector,
    pub dish_block: Selector,
    pub sub_header: Selector,
    pub dish_name: Selector,
    pub dish_description: Selector,
    pub dish_price: Selector,
    /// Sub-headers and dish blocks together, yielded in document order.
    pub grouping: Selector,
    raw: PageStructure,
}

impl PageSelectors {
    pub fn compile(page: &PageStructure) -> Result<Self, SelectorError> {
        Ok(Self {
            title: compile("restaurant_title", &page.restaurant_title)?,
            category_link: compile("category_link", &page.category_link)?,
            dish_block: compile("dish_block", &page.dish_block)?,
            sub_header: compile("sub_category_header", &page.sub_category_header)?,
            dish_name: compile("dish_name", &page.dish_name)?,
            dish_description: compile("dish_description", &page.dish_description)?,
            dish_price: compile("dish_price", &page.dish_price)?,
            grouping: compile(
                "sub_category_header",
                &format!("{}, {}", page.sub_category_header, page.dish_block),
            )?,
            raw: page.clone(),
        })
    }

    /// Raw selectors, used as page-ready conditions by fetch sessions.
    pub fn raw(&self) -> &PageStructure {
        &self.raw
    }
}

fn compile(name: &'static str, selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|e| SelectorError {
        name,
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}
