//! Name validation helpers for hostnames, zones, and identifiers

/// Maximum length of a single DNS label
pub const MAX_DNS_LABEL_LEN: usize = 63;

/// Maximum length of a full DNS name
pub const MAX_DNS_NAME_LEN: usize = 253;

/// Validate a single DNS label (RFC 1123).
///
/// Rules:
/// - 1 to 63 characters
/// - Lowercase letters, digits, and hyphens only
/// - Must not start or end with a hyphen
pub fn validate_dns_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("DNS label cannot be empty".to_string());
    }
    if s.len() > MAX_DNS_LABEL_LEN {
        return Err(format!(
            "DNS label '{}' exceeds {} characters",
            s, MAX_DNS_LABEL_LEN
        ));
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err(format!(
            "DNS label '{}' cannot start or end with a hyphen",
            s
        ));
    }
    for c in s.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(format!(
                "DNS label '{}' must be lowercase alphanumeric with hyphens",
                s
            ));
        }
    }
    Ok(())
}

/// Validate a dotted DNS name such as a hosted zone name
pub fn validate_dns_name(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("DNS name cannot be empty".to_string());
    }
    if s.len() > MAX_DNS_NAME_LEN {
        return Err(format!("DNS name exceeds {} characters", MAX_DNS_NAME_LEN));
    }
    s.split('.').try_for_each(validate_dns_label)
}

/// Validate a free-form identifier used for fleet names, groups, and pools.
///
/// Rules:
/// - Must not be empty
/// - Must start with an ASCII letter
/// - May contain ASCII letters, digits, hyphens, and underscores
pub fn validate_identifier(s: &str) -> Result<(), String> {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        Some(_) => return Err(format!("identifier must start with a letter: {}", s)),
        None => return Err("identifier cannot be empty".to_string()),
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(format!(
                "identifier must be alphanumeric with hyphens or underscores: {}",
                s
            ));
        }
    }

    Ok(())
}
