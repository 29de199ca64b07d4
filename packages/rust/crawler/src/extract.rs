//! Content-extraction capability and its default DOM implementation.
//!
//! The extractor turns raw HTML into an [`Extraction`]: title, main text,
//! structured product/contact records, and outbound links. The DOM heuristics
//! here are deliberately thin; callers can supply their own
//! [`ContentExtractor`] for richer site-specific extraction.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::trace;
use url::Url;

use siteminer_shared::{ContactInfo, Extraction, ProductRecord, Result, SiteMinerError};

/// Capability trait for extracting structure from a fetched page.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, html: &str, base_url: &Url) -> Result<Extraction>;
}

/// Default extractor over the scraper DOM.
pub struct DomExtractor;

/// Selectors tried in order for the main content region.
const CONTENT_SELECTORS: &[&str] = &["main", "article", "#content", ".content"];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("valid regex")
});

impl ContentExtractor for DomExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> Result<Extraction> {
        if html.trim().is_empty() {
            return Err(SiteMinerError::Extraction(format!(
                "{base_url}: empty document"
            )));
        }
        let doc = Html::parse_document(html);

        let title = extract_title(&doc);
        let root = content_root(&doc);
        let text = visible_text(root);
        let products = extract_products(root);
        let contacts = extract_contacts(&doc, &text);
        let links = extract_links(&doc, base_url);

        trace!(
            %base_url,
            words = text.split_whitespace().count(),
            products = products.len(),
            links = links.len(),
            "extracted page"
        );

        Ok(Extraction {
            title,
            text,
            products,
            contacts,
            links,
        })
    }
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("valid selector")
}

fn extract_title(doc: &Html) -> Option<String> {
    for sel in ["title", "h1"] {
        if let Some(el) = doc.select(&selector(sel)).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Pick the main content element, falling back to `<body>`.
fn content_root(doc: &Html) -> ElementRef<'_> {
    for sel in CONTENT_SELECTORS {
        if let Some(el) = doc.select(&selector(sel)).next() {
            return el;
        }
    }
    doc.select(&selector("body"))
        .next()
        .unwrap_or_else(|| doc.root_element())
}

/// Collect text from content-bearing elements, skipping script/style noise.
fn visible_text(root: ElementRef<'_>) -> String {
    let sel = selector("p, h1, h2, h3, h4, h5, h6, li, td, th, blockquote, figcaption");
    let mut parts: Vec<String> = Vec::new();
    for el in root.select(&sel) {
        let text = el
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            parts.push(text);
        }
    }
    if parts.is_empty() {
        // No structural elements at all; fall back to the raw text nodes.
        return root.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ");
    }
    parts.join(" ")
}

fn extract_products(root: ElementRef<'_>) -> Vec<ProductRecord> {
    let product_sel = selector(r#".product, li.product, [itemtype$="/Product"]"#);
    let name_sel = selector(".product-title, .product-name, .name, h2, h3");
    let price_sel = selector(".price, .amount");
    let link_sel = selector("a[href]");
    let img_sel = selector("img[src]");

    let mut products = Vec::new();
    for el in root.select(&product_sel) {
        let Some(name) = el
            .select(&name_sel)
            .next()
            .map(|n| n.text().collect::<String>().trim().to_string())
            .filter(|n| !n.is_empty())
        else {
            continue;
        };
        let price = el
            .select(&price_sel)
            .next()
            .map(|p| p.text().collect::<String>().trim().to_string())
            .filter(|p| !p.is_empty());
        let link = el
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);
        let image = el
            .select(&img_sel)
            .next()
            .and_then(|i| i.value().attr("src"))
            .map(str::to_string);

        products.push(ProductRecord {
            name,
            price,
            description: None,
            image,
            link,
        });
    }
    products
}

fn extract_contacts(doc: &Html, text: &str) -> ContactInfo {
    let mut emails: Vec<String> = Vec::new();
    for m in EMAIL_RE.find_iter(text) {
        let email = m.as_str().to_string();
        if !emails.contains(&email) {
            emails.push(email);
        }
    }
    // mailto: links often carry addresses the visible text omits.
    for el in doc.select(&selector(r#"a[href^="mailto:"]"#)) {
        if let Some(href) = el.value().attr("href") {
            let email = href.trim_start_matches("mailto:").to_string();
            if EMAIL_RE.is_match(&email) && !emails.contains(&email) {
                emails.push(email);
            }
        }
    }

    let mut phones: Vec<String> = Vec::new();
    for m in PHONE_RE.find_iter(text) {
        let phone = m.as_str().trim().to_string();
        if !phones.contains(&phone) {
            phones.push(phone);
        }
    }

    let address = doc
        .select(&selector("address, .address"))
        .next()
        .map(|el| {
            el.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|a| !a.is_empty());

    ContactInfo {
        emails,
        phones,
        address,
    }
}

/// Extract all links from a document, resolved against the base URL.
/// Fragments are stripped; mailto/javascript/anchor-only links are skipped.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();
    for el in doc.select(&selector("a[href]")) {
        if let Some(href) = el.value().attr("href") {
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                continue;
            }
            if let Ok(mut resolved) = base_url.join(href) {
                if resolved.scheme() != "http" && resolved.scheme() != "https" {
                    continue;
                }
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }
    links
}
