//! Country codes, marketplace hosts and product-id validation.

use crate::ConfigError;

/// Supported marketplace countries and their storefront hosts.
pub const SUPPORTED_COUNTRIES: &[(&str, &str)] = &[
    ("us", "www.amazon.com"),
    ("gb", "www.amazon.co.uk"),
    ("ca", "www.amazon.ca"),
    ("de", "www.amazon.de"),
    ("fr", "www.amazon.fr"),
    ("it", "www.amazon.it"),
    ("es", "www.amazon.es"),
    ("jp", "www.amazon.co.jp"),
    ("au", "www.amazon.com.au"),
    ("in", "www.amazon.in"),
    ("mx", "www.amazon.com.mx"),
    ("br", "www.amazon.com.br"),
    ("nl", "www.amazon.nl"),
    ("se", "www.amazon.se"),
    ("pl", "www.amazon.pl"),
    ("sg", "www.amazon.sg"),
    ("ae", "www.amazon.ae"),
];

/// Lower-cases and validates a country code. `uk` is accepted as an alias for `gb`.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] for unsupported countries.
pub fn normalize_country(raw: &str) -> Result<String, ConfigError> {
    let lower = raw.trim().to_ascii_lowercase();
    let lower = if lower == "uk" { "gb".to_string() } else { lower };
    if SUPPORTED_COUNTRIES.iter().any(|(cc, _)| *cc == lower) {
        Ok(lower)
    } else {
        Err(ConfigError::Validation(format!(
            "unsupported country '{raw}'"
        )))
    }
}

/// Returns the storefront host for a normalized country code.
#[must_use]
pub fn marketplace_host(country: &str) -> Option<&'static str> {
    SUPPORTED_COUNTRIES
        .iter()
        .find(|(cc, _)| *cc == country)
        .map(|(_, host)| *host)
}

/// Validates a product id (ASIN): 10 ASCII alphanumerics, returned upper-cased.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] if the id has the wrong shape.
pub fn normalize_product_id(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.len() == 10 && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(ConfigError::Validation(format!(
            "invalid product id '{raw}': expected 10 alphanumeric characters"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_country_lowercases_and_aliases_uk() {
        assert_eq!(normalize_country("US").unwrap(), "us");
        assert_eq!(normalize_country(" uk ").unwrap(), "gb");
    }

    #[test]
    fn normalize_country_rejects_unknown() {
        assert!(normalize_country("zz").is_err());
    }

    #[test]
    fn marketplace_host_lookup() {
        assert_eq!(marketplace_host("de"), Some("www.amazon.de"));
        assert_eq!(marketplace_host("zz"), None);
    }

    #[test]
    fn normalize_product_id_uppercases() {
        assert_eq!(normalize_product_id("b08n5wrwnw").unwrap(), "B08N5WRWNW");
    }

    #[test]
    fn normalize_product_id_rejects_bad_shapes() {
        assert!(normalize_product_id("B08N5").is_err());
        assert!(normalize_product_id("B08N5WRWN-").is_err());
        assert!(normalize_product_id("").is_err());
    }
}
