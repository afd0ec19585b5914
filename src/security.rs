use std::sync::OnceLock;

use md5::{Digest, Md5};
use regex::Regex;
use serde::Serialize;

use crate::constants::MAX_CREDENTIAL_LENGTH;
use crate::error::HashError;

// =============================================================================
// Input Validation
// =============================================================================

/// Result of validating a free-form input before it is hashed or queried
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(message.into()),
        }
    }
}

/// SQL metacharacter and keyword patterns rejected by [`validate_input`]
fn sql_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bunion\s+(all\s+)?select\b",
            r"(?i)\bselect\s+.+\s+from\b",
            r"(?i)\binsert\s+into\b",
            r"(?i)\bdelete\s+from\b",
            r"(?i)\bdrop\s+(table|database|schema)\b",
            r"(?i)\bupdate\s+\w+\s+set\b",
            r"(?i)\bexec(ute)?\s*\(",
            r"(?i)'\s*or\s+'?\w+'?\s*=\s*'?\w+",
            r"--",
            r"/\*",
            r";\s*\w",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Validate a string input: length limit and SQL injection patterns.
///
/// The same validator guards query inputs elsewhere, so credentials get it too
/// even though they are never interpolated into SQL.
pub fn validate_input(input: &str) -> ValidationResult {
    if input.chars().count() > MAX_CREDENTIAL_LENGTH {
        return ValidationResult::reject(format!(
            "Input exceeds maximum length of {} characters",
            MAX_CREDENTIAL_LENGTH
        ));
    }

    if let Some(pattern) = sql_patterns().iter().find(|p| p.is_match(input)) {
        tracing::warn!("Input rejected by security pattern {}", pattern.as_str());
        return ValidationResult::reject("Input contains potentially dangerous content");
    }

    ValidationResult::ok()
}

/// Validate an untyped JSON value, rejecting anything that is not a string
pub fn validate_value(value: &serde_json::Value) -> ValidationResult {
    match value.as_str() {
        Some(input) => validate_input(input),
        None => ValidationResult::reject("Input must be a string"),
    }
}

// =============================================================================
// Credential Hashing
// =============================================================================

/// Result of hashing a credential for the vendor API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashResult {
    /// 32 lowercase hex characters; empty when `is_valid` is false
    pub hash: String,
    pub is_valid: bool,
    pub error: Option<String>,
}

/// Check the vendor wire format: exactly 32 lowercase hex characters
pub fn is_md5_hex(value: &str) -> bool {
    value.len() == 32 && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Hash a plaintext credential into the vendor's MD5 hex format
pub fn try_hash_password(plaintext: &str) -> Result<String, HashError> {
    let validation = validate_input(plaintext);
    if !validation.is_valid {
        return Err(HashError::Validation(
            validation.error.unwrap_or_default(),
        ));
    }

    let trimmed = plaintext.trim();
    if trimmed.is_empty() {
        return Err(HashError::EmptyInput);
    }

    let hash = hex::encode(Md5::digest(trimmed.as_bytes())).to_lowercase();

    if !is_md5_hex(&hash) {
        tracing::error!("MD5 digest produced an unexpected format (len {})", hash.len());
        return Err(HashError::Format);
    }

    Ok(hash)
}

/// Structured variant of [`try_hash_password`] for the presentation boundary
pub fn hash_password(plaintext: &str) -> HashResult {
    match try_hash_password(plaintext) {
        Ok(hash) => HashResult {
            hash,
            is_valid: true,
            error: None,
        },
        Err(e) => HashResult {
            hash: String::new(),
            is_valid: false,
            error: Some(e.to_string()),
        },
    }
}

// =============================================================================
// Self Test
// =============================================================================

/// Known (plaintext, MD5) pairs checked at startup
pub const SELF_TEST_VECTORS: &[(&str, &str)] = &[
    ("password", "5f4dcc3b5aa765d61d8327deb882cf99"),
    ("123456", "e10adc3949ba59abbe56e057f20f883e"),
    ("admin", "21232f297a57a5a743894a0e4a801fc3"),
    ("test", "098f6bcd4621d373cade4e832627b4f6"),
    ("hello", "5d41402abc4b2a76b9719d911017c592"),
];

/// Outcome of running the digest self test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfTestReport {
    pub passed: bool,
    /// Plaintexts whose digest did not match
    pub failures: Vec<String>,
}

/// Hash every self-test vector and compare against the expected digest
pub fn run_self_test() -> SelfTestReport {
    let failures: Vec<String> = SELF_TEST_VECTORS
        .iter()
        .filter(|(plaintext, expected)| {
            let result = hash_password(plaintext);
            !result.is_valid || result.hash != *expected
        })
        .map(|(plaintext, _)| plaintext.to_string())
        .collect();

    if failures.is_empty() {
        tracing::info!("Credential digest self test passed ({} vectors)", SELF_TEST_VECTORS.len());
    } else {
        tracing::error!("Credential digest self test failed for {:?}", failures);
    }

    SelfTestReport {
        passed: failures.is_empty(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Hashing Tests
    // =========================================================================

    #[test]
    fn test_hash_known_value() {
        let result = hash_password("password");
        assert!(result.is_valid);
        assert_eq!(result.hash, "5f4dcc3b5aa765d61d8327deb882cf99");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_hash_trims_input() {
        assert_eq!(
            hash_password("  password\n").hash,
            "5f4dcc3b5aa765d61d8327deb882cf99"
        );
    }

    #[test]
    fn test_hash_empty_input() {
        assert_eq!(try_hash_password(""), Err(HashError::EmptyInput));
        assert_eq!(try_hash_password("   "), Err(HashError::EmptyInput));

        let result = hash_password("");
        assert!(!result.is_valid);
        assert!(result.hash.is_empty());
        assert_eq!(result.error.as_deref(), Some("Password cannot be empty"));
    }

    #[test]
    fn test_hash_format_for_arbitrary_inputs() {
        for input in ["a", "Tr0ub4dor&3", "ünïcödé", "with space", "x".repeat(999).as_str()] {
            let result = hash_password(input);
            assert!(result.is_valid, "{input} should hash");
            assert!(is_md5_hex(&result.hash), "{} is not md5 hex", result.hash);
        }
    }

    #[test]
    fn test_hash_rejects_injection_patterns() {
        let result = hash_password("' OR '1'='1");
        assert!(!result.is_valid);
        assert!(matches!(
            try_hash_password("x; DROP TABLE vehicles"),
            Err(HashError::Validation(_))
        ));
    }

    #[test]
    fn test_self_test_passes() {
        let report = run_self_test();
        assert!(report.passed, "failures: {:?}", report.failures);
    }

    #[test]
    fn test_is_md5_hex() {
        assert!(is_md5_hex("5f4dcc3b5aa765d61d8327deb882cf99"));
        assert!(!is_md5_hex("5F4DCC3B5AA765D61D8327DEB882CF99"));
        assert!(!is_md5_hex("5f4dcc3b5aa765d61d8327deb882cf9"));
        assert!(!is_md5_hex("zf4dcc3b5aa765d61d8327deb882cf99"));
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validate_input_length_limit() {
        assert!(validate_input(&"a".repeat(1000)).is_valid);
        let too_long = validate_input(&"a".repeat(1001));
        assert!(!too_long.is_valid);
        assert!(too_long.error.unwrap().contains("maximum length"));
    }

    #[test]
    fn test_validate_input_sql_patterns() {
        for bad in [
            "1 UNION SELECT password",
            "SELECT * FROM users",
            "insert into vehicles values (1)",
            "admin'--",
            "/* comment */",
            "drop table gp51_sessions",
        ] {
            assert!(!validate_input(bad).is_valid, "{bad} should be rejected");
        }

        for good in ["password", "select-me", "correct horse battery staple", "p@ss=w0rd"] {
            assert!(validate_input(good).is_valid, "{good} should pass");
        }
    }

    #[test]
    fn test_validate_value_rejects_non_strings() {
        assert!(!validate_value(&serde_json::json!(42)).is_valid);
        assert!(!validate_value(&serde_json::json!(null)).is_valid);
        assert!(validate_value(&serde_json::json!("fine")).is_valid);
    }
}
