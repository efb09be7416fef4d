pub mod price;
pub mod selectors;

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::config::PageStructure;
use crate::error::SelectorError;
use crate::model::{Category, Dish, PageCategory, PageContent};
pub use price::parse_price;
use selectors::PageSelectors;

/// Turns raw menu pages into records. Holds only compiled selectors, so one
/// instance is shared by every parse worker.
#[derive(Debug)]
pub struct Extractor {
    sel: PageSelectors,
}

impl Extractor {
    pub fn new(page: &PageStructure) -> Result<Self, SelectorError> {
        Ok(Self {
            sel: PageSelectors::compile(page)?,
        })
    }

    /// Ready condition for restaurant landing pages.
    pub fn landing_ready(&self) -> &str {
        &self.sel.raw().restaurant_title
    }

    /// Menu links on a landing page; these may render after the title.
    pub fn menu_ready(&self) -> &str {
        &self.sel.raw().category_link
    }

    /// Ready condition for category pages.
    pub fn category_ready(&self) -> &str {
        &self.sel.raw().dish_block
    }

    pub fn restaurant_name(&self, page: &PageContent) -> String {
        let doc = Html::parse_document(&page.html);
        doc.select(&self.sel.title)
            .next()
            .map(element_text)
            .unwrap_or_default()
    }

    /// Top-level menu links, hrefs resolved against the page URL. Links
    /// without an href are skipped.
    pub fn categories(&self, page: &PageContent) -> Vec<PageCategory> {
        let doc = Html::parse_document(&page.html);
        let base = Url::parse(&page.url).ok();

        doc.select(&self.sel.category_link)
            .filter_map(|link| {
                let href = link.value().attr("href")?.trim();
                if href.is_empty() {
                    return None;
                }
                let source_url = match &base {
                    Some(b) => b.join(href).ok()?.to_string(),
                    None => href.to_string(),
                };
                Some(PageCategory {
                    label: element_text(link),
                    source_url,
                })
            })
            .collect()
    }

    /// Dish blocks of one category page. Each dish takes the nearest
    /// preceding sub-header in document order as its sub-category; dishes
    /// before any sub-header have none.
    pub fn dishes(&self, page: &PageContent, parent: &Category) -> Vec<Dish> {
        let doc = Html::parse_document(&page.html);
        let mut dishes = Vec::new();
        let mut current_sub: Option<String> = None;

        for el in doc.select(&self.sel.grouping) {
            if self.sel.sub_header.matches(&el) {
                let label = element_text(el);
                current_sub = (!label.is_empty()).then_some(label);
                continue;
            }
            dishes.push(self.dish_from_block(
                el,
                Category::new(parent.category.clone(), current_sub.clone()),
            ));
        }

        dishes
    }

    fn dish_from_block(&self, block: ElementRef, category: Category) -> Dish {
        Dish {
            name: first_text(block, &self.sel.dish_name),
            category,
            description: first_text(block, &self.sel.dish_description),
            price: parse_price(&first_text(block, &self.sel.dish_price)),
        }
    }
}

fn first_text(block: ElementRef, selector: &Selector) -> String {
    block
        .select(selector)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

fn element_text(el: ElementRef) -> String {
    let raw: String = el.text().collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ──
