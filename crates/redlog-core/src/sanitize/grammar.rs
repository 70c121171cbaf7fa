//! Per-field grammar checks
//!
//! Every check returns a `validator::ValidationError` whose code names the
//! failed rule. A check that cannot run (pattern failed to compile) rejects
//! the value with `validation_unavailable`.

use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::error;
use validator::ValidationError;

use redlog_common::MAX_PRESERVED_FIELD_LENGTH;

use super::{FieldRule, field_rule};

/// Maximum length of username, status and analyst
pub const MAX_IDENTIFIER_LENGTH: usize = 75;

pub const MAX_HASH_ALGORITHM_LENGTH: usize = 20;

pub const MAX_HASH_VALUE_LENGTH: usize = 128;

pub const MAX_PID_DIGITS: usize = 10;

pub const MAX_TAG_NAME_LENGTH: usize = 50;

type Pattern = LazyLock<Result<Regex, regex::Error>>;

static HOSTNAME_PATTERN: Pattern =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9\-_.]{0,73}[a-zA-Z0-9]$"));

static IDENTIFIER_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,75}$"));

static MAC_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^[0-9A-F]{2}(-[0-9A-F]{2}){5}$"));

static HASH_ALGORITHM_PATTERN: Pattern =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{1,20}$"));

static HASH_VALUE_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{1,128}$"));

static TAG_NAME_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 _./:-]{1,50}$"));

static TAG_COLOR_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$"));

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn check(
    pattern: &Pattern,
    value: &str,
    code: &'static str,
    message: &'static str,
) -> Result<(), ValidationError> {
    match &**pattern {
        Ok(re) if re.is_match(value) => Ok(()),
        Ok(_) => Err(invalid(code, message)),
        Err(e) => {
            error!(error = %e, code, "Validation pattern unavailable, rejecting value");
            Err(invalid(
                "validation_unavailable",
                "value could not be validated",
            ))
        }
    }
}

/// Validate an IPv4 or IPv6 address
pub fn validate_ip(ip: &str) -> Result<(), ValidationError> {
    if ip.parse::<IpAddr>().is_err() {
        return Err(invalid("invalid_ip", "must be an IPv4 or IPv6 address"));
    }
    Ok(())
}

/// Validate a hostname or domain
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    check(
        &HOSTNAME_PATTERN,
        hostname,
        "invalid_hostname",
        "must be 2-75 letters, digits, '-', '_' or '.', starting and ending alphanumeric",
    )
}

/// Validate a username, status or analyst name
pub fn validate_identifier(value: &str) -> Result<(), ValidationError> {
    check(
        &IDENTIFIER_PATTERN,
        value,
        "invalid_identifier",
        "must be 1-75 letters, digits, '-' or '_'",
    )
}

/// Validate a MAC address in canonical `AA-BB-CC-DD-EE-FF` form
pub fn validate_mac_address(mac: &str) -> Result<(), ValidationError> {
    check(
        &MAC_PATTERN,
        mac,
        "invalid_mac",
        "must be six hex pairs separated by ':' or '-', or 12 hex digits",
    )
}

/// Validate a process id, returning its numeric value
pub fn validate_pid(pid: &str) -> Result<i64, ValidationError> {
    if pid.is_empty() || pid.len() > MAX_PID_DIGITS || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("invalid_pid", "must be 1-10 decimal digits"));
    }
    pid.parse::<i64>()
        .map_err(|_| invalid("invalid_pid", "must be 1-10 decimal digits"))
}

/// Validate the length of a preserve-syntax value, in characters
pub fn validate_preserved_length(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() > MAX_PRESERVED_FIELD_LENGTH {
        return Err(invalid("too_long", "must be at most 254 characters"));
    }
    Ok(())
}

/// Validate a (trimmed) tag name
pub fn validate_tag_name(name: &str) -> Result<(), ValidationError> {
    check(
        &TAG_NAME_PATTERN,
        name,
        "invalid_tag_name",
        "must be 1-50 letters, digits, spaces or '_', '.', ':', '/', '-'",
    )
}

/// Validate a `#RRGGBB` tag color
pub fn validate_tag_color(color: &str) -> Result<(), ValidationError> {
    check(
        &TAG_COLOR_PATTERN,
        color,
        "invalid_color",
        "must be a #RRGGBB hex color",
    )
}

/// Validate an already sanitized, non-empty value of a log record field
pub fn validate_field(field: &str, value: &str) -> Result<(), ValidationError> {
    match field_rule(field) {
        Some(FieldRule::PreserveSyntax) => validate_preserved_length(value),
        Some(FieldRule::IpAddress) => validate_ip(value),
        Some(FieldRule::Hostname) => validate_hostname(value),
        Some(FieldRule::Identifier) => validate_identifier(value),
        Some(FieldRule::MacAddress) => validate_mac_address(value),
        Some(FieldRule::HashAlgorithm) => check(
            &HASH_ALGORITHM_PATTERN,
            value,
            "invalid_hash_algorithm",
            "must be 1-20 letters, digits or '-'",
        ),
        Some(FieldRule::HashValue) => check(
            &HASH_VALUE_PATTERN,
            value,
            "invalid_hash_value",
            "must be 1-128 hex digits",
        ),
        Some(FieldRule::Pid) => validate_pid(value).map(|_| ()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ip() {
        assert!(validate_ip("10.0.0.5").is_ok());
        assert!(validate_ip("fe80::1").is_ok());
        assert!(validate_ip("::ffff:192.168.1.1").is_ok());
        assert!(validate_ip("10.0.0.256").is_err());
        assert_eq!(validate_ip("10.0.0").unwrap_err().code, "invalid_ip");
    }

    #[test]
    fn test_validate_hostname() {
        assert!(validate_hostname("ws01").is_ok());
        assert!(validate_hostname("dc-01.corp.example.com").is_ok());
        assert!(validate_hostname("a1").is_ok());
        assert!(validate_hostname("a").is_err());
        assert!(validate_hostname("-ws01").is_err());
        assert!(validate_hostname("ws01.").is_err());
        assert!(validate_hostname("ws 01").is_err());
        assert!(validate_hostname(&"a".repeat(75)).is_ok());
        assert!(validate_hostname(&"a".repeat(76)).is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("jsmith").is_ok());
        assert!(validate_identifier("svc_backup-01").is_ok());
        assert!(validate_identifier("CORP\\jsmith").is_err());
        assert!(validate_identifier("j.smith").is_err());
        assert!(validate_identifier(&"x".repeat(MAX_IDENTIFIER_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_mac_address_requires_canonical() {
        assert!(validate_mac_address("AA-BB-CC-DD-EE-FF").is_ok());
        assert!(validate_mac_address("aa-bb-cc-dd-ee-ff").is_err());
        assert!(validate_mac_address("AA:BB:CC:DD:EE:FF").is_err());
        assert_eq!(
            validate_mac_address("zz").unwrap_err().code,
            "invalid_mac"
        );
    }

    #[test]
    fn test_validate_pid() {
        assert_eq!(validate_pid("4242").unwrap(), 4242);
        assert_eq!(validate_pid("9999999999").unwrap(), 9_999_999_999);
        assert!(validate_pid("12345678901").is_err());
        assert!(validate_pid("-1").is_err());
        assert!(validate_pid("").is_err());
    }

    #[test]
    fn test_validate_preserved_length_counts_chars() {
        assert!(validate_preserved_length(&"é".repeat(254)).is_ok());
        let err = validate_preserved_length(&"a".repeat(255)).unwrap_err();
        assert_eq!(err.code, "too_long");
    }

    #[test]
    fn test_validate_field_dispatch() {
        assert!(validate_field("hash_algorithm", "SHA-256").is_ok());
        assert!(validate_field("hash_algorithm", "sha256!").is_err());
        assert!(validate_field("hash_value", "d41d8cd98f00b204e9800998ecf8427e").is_ok());
        assert!(validate_field("hash_value", "xyz").is_err());
        assert!(validate_field("status", "success").is_ok());
        assert!(validate_field("internal_ip", "not-an-ip").is_err());
        assert!(validate_field("command", "rm -rf / --no-preserve-root").is_ok());
        assert!(validate_field("unknown", "anything").is_ok());
    }

    #[test]
    fn test_validate_tag_name_and_color() {
        assert!(validate_tag_name("privilege-escalation").is_ok());
        assert!(validate_tag_name("T1059.001: PowerShell").is_ok());
        assert!(validate_tag_name("").is_err());
        assert!(validate_tag_name("<b>").is_err());
        assert!(validate_tag_name(&"t".repeat(MAX_TAG_NAME_LENGTH + 1)).is_err());
        assert!(validate_tag_color("#6B7280").is_ok());
        assert!(validate_tag_color("6B7280").is_err());
        assert!(validate_tag_color("#6B728").is_err());
    }
}
