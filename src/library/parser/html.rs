//! XHTML cover pages, read with `scraper`.

use scraper::{Html, Selector};

/// `src` of the first `<img>` in an XHTML page.
pub fn first_image_src(page: &str) -> Option<String> {
    let document = Html::parse_document(page);
    let selector = Selector::parse("img").ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr("src")
        .map(str::to_string)
}
