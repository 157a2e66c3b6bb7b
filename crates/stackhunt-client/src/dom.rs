use scraper::{ElementRef, Html, Selector};
use stackhunt_core::error::AppError;
use stackhunt_core::models::{Record, Technologies};
use stackhunt_core::traits::{RecordExtractor, TechnologyParser};

/// Parses a CSS selector known at compile time.
fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ExtractionError(format!("Bad selector {css}: {e}")))
}

/// Collapsed text content of an element, roughly what `innerText` yields.
fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pulls listing entries out of a rendered Product Hunt launch page.
///
/// Title, link, description and popularity counter are required; a missing
/// one fails that entry only. Image and tags are optional.
pub struct ListingExtractor {
    item: Selector,
    name: Selector,
    description: Selector,
    image: Selector,
    tag: Selector,
    comment: Selector,
}

impl ListingExtractor {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            item: selector(r#"[data-test^="post-item-"]"#)?,
            name: selector(r#"[data-test^="post-name-"]"#)?,
            description: selector("a.text-16.font-normal.text-dark-gray.text-secondary")?,
            image: selector("a img")?,
            tag: selector(r#"[data-sentry-component="TagList"] a"#)?,
            comment: selector("button .text-14.font-semibold.text-dark-gray")?,
        })
    }

    fn extract_item(&self, index: usize, item: ElementRef<'_>) -> Result<Record, AppError> {
        let missing =
            |field: &str| AppError::ExtractionError(format!("Entry {index} has no {field} element"));

        let name = item.select(&self.name).next().ok_or_else(|| missing("title"))?;
        let link = name
            .value()
            .attr("href")
            .ok_or_else(|| missing("detail link"))?
            .to_string();
        let description = item
            .select(&self.description)
            .next()
            .ok_or_else(|| missing("description"))?;
        let comment = item
            .select(&self.comment)
            .next()
            .ok_or_else(|| missing("comment counter"))?;

        Ok(Record {
            title: text_of(name),
            description: text_of(description),
            image: item
                .select(&self.image)
                .next()
                .and_then(|img| img.value().attr("src"))
                .map(str::to_string),
            tags: item.select(&self.tag).map(text_of).collect(),
            comment: text_of(comment),
            link,
            website_link: None,
            technologies: None,
        })
    }
}

impl RecordExtractor for ListingExtractor {
    fn extract(&self, html: &str) -> Vec<Result<Record, AppError>> {
        let document = Html::parse_document(html);
        document
            .select(&self.item)
            .enumerate()
            .map(|(index, item)| self.extract_item(index, item))
            .collect()
    }
}

/// Buckets the inspection service's technology list by the category path
/// each entry links to.
pub struct BuiltWithParser {
    row: Selector,
    heading_link: Selector,
}

impl BuiltWithParser {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            row: selector(".row.mb-1.mt-1 .col-12")?,
            heading_link: selector("h2 a")?,
        })
    }
}

impl TechnologyParser for BuiltWithParser {
    fn parse(&self, html: &str) -> Result<Technologies, AppError> {
        let document = Html::parse_document(html);
        let mut technologies = Technologies::default();

        for row in document.select(&self.row) {
            let Some(anchor) = row.select(&self.heading_link).next() else {
                continue;
            };
            let name = text_of(anchor);
            let href = anchor.value().attr("href").unwrap_or_default();
            if name.is_empty() {
                continue;
            }

            if href.contains("/framework/") {
                technologies.frameworks.push(name);
            } else if href.contains("/javascript/") {
                technologies.javascript_libraries.push(name);
            } else if href.contains("/cms/") {
                technologies.cms.push(name);
            }
        }

        tracing::debug!(
            frameworks = technologies.frameworks.len(),
            cms = technologies.cms.len(),
            javascript = technologies.javascript_libraries.len(),
            "Parsed technology list"
        );
        Ok(technologies)
    }
}
