use super::PageMetadata;
use lazy_static::lazy_static;
use scraper::{Html, Selector};

lazy_static! {
    static ref TITLE_SELECTOR: Selector = Selector::parse("title").expect("valid selector");
    static ref META_SELECTOR: Selector = Selector::parse("meta").expect("valid selector");
}

/// Extract title, description and Open Graph properties from an HTML
/// document.
///
/// The `<title>` element wins over `og:title`, and `<meta name="description">`
/// wins over `og:description`. Missing fields are left empty.
pub fn extract_metadata(html: &str) -> PageMetadata {
    let document = Html::parse_document(html);
    let mut metadata = PageMetadata::default();

    if let Some(title) = document.select(&TITLE_SELECTOR).next() {
        metadata.title = title.text().collect::<String>().trim().to_string();
    }

    let mut description: Option<String> = None;
    for meta in document.select(&META_SELECTOR) {
        let element = meta.value();

        if description.is_none()
            && element
                .attr("name")
                .is_some_and(|name| name.trim().eq_ignore_ascii_case("description"))
        {
            description = Some(element.attr("content").unwrap_or_default().trim().to_string());
        }

        let Some(property) = element.attr("property") else {
            continue;
        };
        let property = property.trim().to_lowercase();
        if !property.starts_with("og:") {
            continue;
        }
        let content = element.attr("content").unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        metadata
            .properties
            .entry(property)
            .or_default()
            .push(content.to_string());
    }

    metadata.description = description.unwrap_or_default();

    if metadata.title.is_empty() {
        if let Some(og_title) = metadata.first_property("og:title") {
            metadata.title = og_title.to_string();
        }
    }
    if metadata.description.is_empty() {
        if let Some(og_description) = metadata.first_property("og:description") {
            metadata.description = og_description.to_string();
        }
    }

    metadata
}
