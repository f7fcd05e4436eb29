//! Anti-automation detection on marketplace responses.

/// Substrings that only appear on interstitial/CAPTCHA pages.
const SOFT_BLOCK_MARKERS: &[&str] = &[
    "enter the characters you see below",
    "type the characters you see in this image",
    "/errors/validatecaptcha",
    "captcha",
    "to discuss automated access to amazon data",
    "api-services-support@amazon.com",
    "sorry, we just need to make sure you're not a robot",
    "unusual traffic",
];

/// Paths that indicate the session was bounced to a login wall.
const SIGN_IN_MARKERS: &[&str] = &["/ap/signin", "/ap/sign-in", "/gp/sign-in"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSignal {
    /// Rotate and retry.
    Soft(String),
    /// Bench the credential and give up on this variant.
    Hard(String),
}

/// Classifies a response. `None` means the page looks like real content.
#[must_use]
pub fn detect_block(status: u16, final_url: &str, body: &str) -> Option<BlockSignal> {
    let url_lower = final_url.to_ascii_lowercase();
    if SIGN_IN_MARKERS.iter().any(|m| url_lower.contains(m)) {
        return Some(BlockSignal::Hard(format!("redirected to sign-in ({final_url})")));
    }
    if status == 429 || status == 503 {
        return Some(BlockSignal::Soft(format!("http {status}")));
    }
    let lower = body.to_ascii_lowercase();
    SOFT_BLOCK_MARKERS
        .iter()
        .find(|m| lower.contains(*m))
        .map(|m| BlockSignal::Soft((*m).to_string()))
}

/// `true` when the body carries CAPTCHA markers specifically.
#[must_use]
pub fn is_captcha(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("captcha") || lower.contains("enter the characters you see below")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_page_is_not_blocked() {
        let html = r#"<div data-hook="review">Great kettle</div>"#;
        assert_eq!(detect_block(200, "https://www.amazon.com/product-reviews/B0", html), None);
    }

    #[test]
    fn rate_limit_statuses_are_soft_blocks() {
        assert!(matches!(detect_block(429, "https://x", ""), Some(BlockSignal::Soft(_))));
        assert!(matches!(detect_block(503, "https://x", ""), Some(BlockSignal::Soft(_))));
    }

    #[test]
    fn captcha_body_is_soft_block() {
        let html = "<form action=\"/errors/validateCaptcha\">Enter the characters you see below</form>";
        assert!(matches!(detect_block(200, "https://x", html), Some(BlockSignal::Soft(_))));
        assert!(is_captcha(html));
    }

    #[test]
    fn sign_in_redirect_is_hard_block() {
        let signal = detect_block(200, "https://www.amazon.com/ap/signin?openid=x", "<html/>");
        assert!(matches!(signal, Some(BlockSignal::Hard(_))));
    }
}
