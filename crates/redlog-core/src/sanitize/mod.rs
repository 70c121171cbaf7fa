//! Field-level cleaning and grammar checking
//!
//! Two regimes apply to log record fields:
//! - preserve-syntax fields keep shell and path metacharacters but can never
//!   carry markup (`command`, `notes`, `filename`, `secrets`)
//! - strict fields are validated against a grammar, never rewritten, with the
//!   exception of MAC addresses which are normalized to canonical form

mod redact;
mod sanitizer;
mod grammar;

pub use redact::redact_sensitive;
pub use sanitizer::{
    normalize_mac_address, sanitize_field, sanitize_object, sanitize_preserve_syntax,
    sanitize_strict, strip_markup_chars, strip_to_identifier,
};
pub use grammar::{
    MAX_HASH_ALGORITHM_LENGTH, MAX_HASH_VALUE_LENGTH, MAX_IDENTIFIER_LENGTH, MAX_PID_DIGITS,
    MAX_TAG_NAME_LENGTH, validate_field, validate_hostname, validate_identifier, validate_ip,
    validate_mac_address, validate_pid, validate_preserved_length, validate_tag_color,
    validate_tag_name,
};

/// How a field is cleaned and checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Free text that may contain shell or path syntax
    PreserveSyntax,
    /// IPv4 or IPv6 address
    IpAddress,
    /// Hostname or domain
    Hostname,
    /// Username, status, analyst
    Identifier,
    MacAddress,
    HashAlgorithm,
    HashValue,
    /// Process id, decimal digits
    Pid,
}

impl FieldRule {
    pub fn is_strict(self) -> bool {
        self != FieldRule::PreserveSyntax
    }
}

/// Log record fields that keep their syntax
pub const PRESERVE_SYNTAX_FIELDS: &[&str] = &["command", "notes", "filename", "secrets"];

/// Rule for a known log record field
pub fn field_rule(field: &str) -> Option<FieldRule> {
    let rule = match field {
        "command" | "notes" | "filename" | "secrets" => FieldRule::PreserveSyntax,
        "internal_ip" | "external_ip" => FieldRule::IpAddress,
        "hostname" | "domain" => FieldRule::Hostname,
        "username" | "status" | "analyst" => FieldRule::Identifier,
        "mac_address" => FieldRule::MacAddress,
        "hash_algorithm" => FieldRule::HashAlgorithm,
        "hash_value" => FieldRule::HashValue,
        "pid" => FieldRule::Pid,
        _ => return None,
    };
    Some(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_rule_classification() {
        for field in PRESERVE_SYNTAX_FIELDS {
            assert_eq!(field_rule(field), Some(FieldRule::PreserveSyntax));
        }
        assert_eq!(field_rule("external_ip"), Some(FieldRule::IpAddress));
        assert_eq!(field_rule("domain"), Some(FieldRule::Hostname));
        assert_eq!(field_rule("status"), Some(FieldRule::Identifier));
        assert!(field_rule("pid").unwrap().is_strict());
        assert_eq!(field_rule("locked_by"), None);
    }
}
