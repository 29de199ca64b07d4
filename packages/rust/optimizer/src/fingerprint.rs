//! Content fingerprinting for deduplication.
//!
//! All fingerprints are SHA-256 digests, hex-encoded. Structured records are
//! fingerprinted over a canonical field tuple rather than raw text, so
//! cosmetic differences (case, whitespace, punctuation in phone numbers) do
//! not defeat dedup. Pure functions, no side effects.

use sha2::{Digest, Sha256};

use siteminer_shared::ProductRecord;

/// Fingerprint arbitrary text content.
pub fn fingerprint_text(text: &str) -> String {
    digest(text.as_bytes())
}

/// Fingerprint a product over its canonical (name, price) tuple.
pub fn fingerprint_product(product: &ProductRecord) -> String {
    let name = canonical(&product.name);
    let price = product.price.as_deref().map(canonical).unwrap_or_default();
    digest(format!("product\x1f{name}\x1f{price}").as_bytes())
}

/// Fingerprint an email address (lowercased, trimmed).
pub fn fingerprint_email(email: &str) -> String {
    digest(format!("email\x1f{}", canonical(email)).as_bytes())
}

/// Fingerprint a phone number (digits only; a leading `+` is preserved).
pub fn fingerprint_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    digest(format!("phone\x1f{normalized}").as_bytes())
}

fn canonical(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_fingerprint_is_deterministic() {
        let a = fingerprint_text("hello world");
        let b = fingerprint_text("hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // SHA-256 = 64 hex chars
        assert_ne!(a, fingerprint_text("hello worlds"));
    }

    #[test]
    fn product_fingerprint_ignores_cosmetic_differences() {
        let a = ProductRecord {
            name: "JBL  Flip 6".into(),
            price: Some("48,900.00".into()),
            description: Some("Bluetooth speaker".into()),
            image: None,
            link: None,
        };
        let b = ProductRecord {
            name: "jbl flip 6".into(),
            price: Some("48,900.00".into()),
            description: Some("a completely different description".into()),
            image: Some("https://a.test/img.png".into()),
            link: Some("https://a.test/p/1".into()),
        };
        assert_eq!(fingerprint_product(&a), fingerprint_product(&b));

        let c = ProductRecord {
            price: Some("1.00".into()),
            ..a.clone()
        };
        assert_ne!(fingerprint_product(&a), fingerprint_product(&c));
    }

    #[test]
    fn email_normalized() {
        assert_eq!(
            fingerprint_email("Sales@Example.COM "),
            fingerprint_email("sales@example.com")
        );
    }

    #[test]
    fn phone_normalized_to_digits() {
        assert_eq!(
            fingerprint_phone("+94 (11) 234-5678"),
            fingerprint_phone("+94112345678")
        );
        // Leading + is significant.
        assert_ne!(fingerprint_phone("+94112345678"), fingerprint_phone("94112345678"));
    }

    #[test]
    fn record_kinds_do_not_collide() {
        // Same canonical payload under different kinds must differ.
        assert_ne!(fingerprint_email("123"), fingerprint_phone("123"));
    }
}
