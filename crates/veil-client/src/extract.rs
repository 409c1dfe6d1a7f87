use std::collections::BTreeSet;

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;
use veil_core::error::AppError;
use veil_core::models::PageContent;
use veil_core::traits::PageExtractor;

/// Elements whose text is never visible.
const HIDDEN_TEXT: &[&str] = &["script", "style", "noscript", "template"];

/// Extracts visible text and media URLs with `scraper`.
///
/// Relative media URLs are resolved against `<base href>` when present,
/// otherwise against the page URL. Only `http`/`https` results are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl PageExtractor for HtmlExtractor {
    fn extract(&self, html: &str, page_url: &str) -> Result<PageContent, AppError> {
        let document = Html::parse_document(html);
        let base = document_base(&document, page_url)?;

        let mut image_urls = BTreeSet::new();
        for img in document.select(&selector("img[src]")?) {
            collect_url(&mut image_urls, base.as_ref(), img, "src");
        }

        // <source> covers video children as well as stray sources elsewhere.
        let mut video_urls = BTreeSet::new();
        for media in document.select(&selector("video[src], source[src]")?) {
            collect_url(&mut video_urls, base.as_ref(), media, "src");
        }

        Ok(PageContent {
            text: visible_text(&document),
            image_urls,
            video_urls,
        })
    }
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ExtractionFailure(format!("selector {css}: {e}")))
}

fn document_base(document: &Html, page_url: &str) -> Result<Option<Url>, AppError> {
    let page = Url::parse(page_url).ok();
    let base_href = document
        .select(&selector("base[href]")?)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty());

    let base = match (base_href, &page) {
        (Some(href), Some(page)) => page.join(href).ok().or_else(|| Some(page.clone())),
        (Some(href), None) => Url::parse(href).ok(),
        (None, _) => page,
    };
    Ok(base)
}

fn collect_url(out: &mut BTreeSet<String>, base: Option<&Url>, element: ElementRef<'_>, attr: &str) {
    let Some(raw) = element.value().attr(attr).map(str::trim) else {
        return;
    };
    if raw.is_empty() {
        return;
    }
    let resolved = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    };
    if let Ok(url) = resolved
        && matches!(url.scheme(), "http" | "https")
    {
        out.insert(url.to_string());
    }
}

/// Non-empty text nodes outside hidden elements, trimmed, one per line.
fn visible_text(document: &Html) -> String {
    let mut lines = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_TEXT.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }
    lines.join("\n")
}
