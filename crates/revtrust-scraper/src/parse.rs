//! Regex extraction of reviews and product metadata from marketplace HTML.
//!
//! Review listing pages mark each review with `data-hook="review"` and its
//! parts with further `data-hook` attributes; product pages use fixed element
//! ids (`productTitle`, `landingImage`, `feature-bullets`).

use chrono::NaiveDate;
use regex::Regex;

use revtrust_core::{ProductMetadata, ReviewRecord};

/// Reviews parsed from one listing page plus whatever metadata it exposed.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub reviews: Vec<ReviewRecord>,
    pub metadata: ProductMetadata,
    pub total_count: Option<u32>,
}

/// Parses a review listing page (or an HTML fragment holding review blocks).
#[must_use]
pub fn parse_review_page(html: &str) -> ParsedPage {
    ParsedPage {
        reviews: parse_review_blocks(html),
        metadata: parse_listing_metadata(html),
        total_count: parse_total_count(html),
    }
}

/// Extracts every `data-hook="review"` block.
#[must_use]
pub fn parse_review_blocks(html: &str) -> Vec<ReviewRecord> {
    let start_re =
        Regex::new(r#"(?is)<(?:div|li)\b[^>]*data-hook\s*=\s*"review"[^>]*>"#).expect("valid review regex");
    let starts: Vec<(usize, usize)> = start_re
        .find_iter(html)
        .map(|m| (m.start(), m.end()))
        .collect();

    starts
        .iter()
        .enumerate()
        .filter_map(|(i, &(tag_start, tag_end))| {
            let block_end = starts.get(i + 1).map_or(html.len(), |next| next.0);
            parse_review_block(&html[tag_start..tag_end], &html[tag_end..block_end])
        })
        .collect()
}

fn parse_review_block(open_tag: &str, block: &str) -> Option<ReviewRecord> {
    let id_re = Regex::new(r#"\bid\s*=\s*"([^"]+)""#).expect("valid id regex");
    let id = id_re
        .captures(open_tag)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let rating = parse_rating(block);
    let body = hook_text(block, "review-body").map(|b| strip_read_more(&b));
    if rating.is_none() && body.is_none() {
        return None;
    }

    let mut record = ReviewRecord::new(rating, body.filter(|b| !b.is_empty()));
    if let Some(id) = id {
        record.id = id;
    }
    record.title = first_capture(block, r#"(?is)data-hook\s*=\s*"review-title"[^>]*>(.*?)</(?:a|h5)>"#)
        .or_else(|| hook_text(block, "review-title"))
        .map(|t| strip_star_prefix(&t))
        .filter(|t| !t.is_empty());
    record.author = first_capture(block, r#"(?is)class\s*=\s*"a-profile-name"[^>]*>(.*?)<"#);
    record.verified_purchase = block.contains(r#"data-hook="avp-badge""#)
        || block.to_ascii_lowercase().contains("verified purchase");
    record.incentivized = is_incentivized(block);
    record.posted_date = hook_text(block, "review-date").and_then(|d| parse_review_date(&d));
    record.helpful_count =
        hook_text(block, "helpful-vote-statement").and_then(|s| parse_helpful_votes(&s));
    record.images = parse_review_images(block);
    record.videos = all_captures(block, r#"(?is)data-video-url\s*=\s*"([^"]+)""#);
    Some(record)
}

/// Star rating from the icon alt text (`4.0 out of 5 stars`, `4,0 von 5 Sternen`)
/// or the `a-star-N` class.
fn parse_rating(block: &str) -> Option<u8> {
    let alt_re = Regex::new(
        r#"(?is)data-hook\s*=\s*"(?:cmps-)?review-star-rating"[^>]*>.*?<span[^>]*class\s*=\s*"a-icon-alt"[^>]*>\s*(\d)(?:[.,]\d)?"#,
    )
    .expect("valid star rating regex");
    if let Some(rating) = alt_re
        .captures(block)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
    {
        return Some(rating);
    }

    let text_re = Regex::new(r"(?i)(\d)(?:[.,]\d)?\s+out\s+of\s+5\s+stars").expect("valid stars text regex");
    if let Some(rating) = text_re
        .captures(block)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
    {
        return Some(rating);
    }

    let class_re = Regex::new(r"\ba-star-(\d)\b").expect("valid star class regex");
    class_re
        .captures(block)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
}

fn is_incentivized(block: &str) -> bool {
    let lower = block.to_ascii_lowercase();
    lower.contains("vine customer review of free product")
        || lower.contains("vine voice")
        || lower.contains("received this product for free")
        || lower.contains("in exchange for my honest review")
        || lower.contains("discounted price in exchange")
}

/// `"One person found this helpful"` → 1, `"1,024 people found this helpful"` → 1024.
#[must_use]
pub fn parse_helpful_votes(statement: &str) -> Option<u32> {
    let lower = statement.trim().to_ascii_lowercase();
    if lower.starts_with("one person") || lower.starts_with("a person") {
        return Some(1);
    }
    let digits: String = lower
        .split_whitespace()
        .next()?
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Date from `"Reviewed in the United States on January 5, 2024"` or
/// `"Reviewed in the United Kingdom on 5 January 2024"`.
#[must_use]
pub fn parse_review_date(text: &str) -> Option<NaiveDate> {
    let tail = text.rsplit(" on ").next().unwrap_or(text).trim();
    NaiveDate::parse_from_str(tail, "%B %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(tail, "%d %B %Y"))
        .or_else(|_| NaiveDate::parse_from_str(tail, "%Y-%m-%d"))
        .ok()
}

fn parse_review_images(block: &str) -> Vec<String> {
    let tile_re = Regex::new(r#"(?is)<img\b[^>]*review-image-tile[^>]*>"#).expect("valid image tile regex");
    let src_re = Regex::new(r#"(?is)\bsrc\s*=\s*"([^"]+)""#).expect("valid src regex");
    tile_re
        .find_iter(block)
        .filter_map(|tag| {
            src_re
                .captures(tag.as_str())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Title, description and image from a listing or product page.
#[must_use]
pub fn parse_listing_metadata(html: &str) -> ProductMetadata {
    let title = first_capture(html, r#"(?is)id\s*=\s*"productTitle"[^>]*>(.*?)</"#)
        .or_else(|| hook_text(html, "product-link"))
        .filter(|t| !t.is_empty());

    let description = first_capture(
        html,
        r#"(?is)id\s*=\s*"feature-bullets"[^>]*>.*?<ul[^>]*>(.*?)</ul>"#,
    )
    .or_else(|| first_capture(html, r#"(?is)id\s*=\s*"productDescription"[^>]*>(.*?)</div>"#))
    .filter(|d| !d.is_empty());

    let image_url = product_image(html);

    ProductMetadata {
        title,
        description,
        image_url,
    }
}

fn product_image(html: &str) -> Option<String> {
    let tag_re = Regex::new(
        r#"(?is)<img\b[^>]*(?:id\s*=\s*"landingImage"|data-hook\s*=\s*"cr-product-image")[^>]*>"#,
    )
    .expect("valid product image regex");
    let tag = tag_re.find(html)?.as_str();
    let hires_re = Regex::new(r#"(?is)data-old-hires\s*=\s*"(https?://[^"]+)""#).expect("valid hires regex");
    let src_re = Regex::new(r#"(?is)\bsrc\s*=\s*"(https?://[^"]+)""#).expect("valid src regex");
    hires_re
        .captures(tag)
        .or_else(|| src_re.captures(tag))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Marketplace-reported review/rating count.
#[must_use]
pub fn parse_total_count(html: &str) -> Option<u32> {
    let patterns = [
        r#"(?is)data-hook\s*=\s*"total-review-count"[^>]*>\s*(?:<span[^>]*>)?\s*([\d,.]+)"#,
        r#"(?is)id\s*=\s*"acrCustomerReviewText"[^>]*>\s*([\d,.]+)"#,
        r"(?i)([\d,.]+)\s+(?:global|total)\s+(?:ratings|reviews)",
    ];
    patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).expect("valid total count regex");
        re.captures(html)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_count(m.as_str()))
    })
}

fn parse_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Cleaned text of the element carrying `data-hook="<hook>"`, up to the next
/// `data-hook` attribute.
fn hook_text(html: &str, hook: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r#"(?is)data-hook\s*=\s*"{}"[^>]*>"#,
        regex::escape(hook)
    ))
    .expect("valid hook regex");
    let m = re.find(html)?;
    let rest = &html[m.end()..];
    let end = rest.find("data-hook=").map_or(rest.len(), |pos| {
        // back up to the start of the tag carrying the next hook
        rest[..pos].rfind('<').unwrap_or(pos)
    });
    let text = clean_text(&rest[..end]);
    (!text.is_empty()).then_some(text)
}

fn first_capture(html: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).expect("valid capture regex");
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| clean_text(m.as_str()))
        .filter(|t| !t.is_empty())
}

fn all_captures(html: &str, pattern: &str) -> Vec<String> {
    let re = Regex::new(pattern).expect("valid capture regex");
    re.captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn strip_star_prefix(title: &str) -> String {
    let re = Regex::new(r"(?i)^\s*\d(?:[.,]\d)?\s+out\s+of\s+5\s+stars\s*").expect("valid star prefix regex");
    re.replace(title, "").trim().to_string()
}

fn strip_read_more(body: &str) -> String {
    body.trim_end_matches("Read more").trim().to_string()
}

/// Strips tags, decodes the common entities and collapses whitespace.
#[must_use]
pub fn clean_text(input: &str) -> String {
    let tags = Regex::new(r"(?is)<script.*?</script>|<style.*?</style>|<[^>]+>").expect("valid tags regex");
    let no_tags = tags.replace_all(input, " ");
    let decoded = no_tags
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
