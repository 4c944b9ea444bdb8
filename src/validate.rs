//! Local shape checks run before anything reaches the network.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static ACCESS_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{10}$").expect("access key pattern"));
static SECRET_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{16}$").expect("secret key pattern"));
static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{5}$").expect("identifier pattern"));

const METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid access key: expected 10 uppercase letters or digits")]
    AccessKey,
    #[error("invalid secret key: expected 16 lowercase letters or digits")]
    SecretKey,
    #[error("invalid {kind} identifier '{value}': expected 5 lowercase hex characters")]
    Ident { kind: &'static str, value: String },
    #[error("missing required option --{0}")]
    Missing(&'static str),
    #[error("invalid value for --{option}: {reason}")]
    Value {
        option: &'static str,
        reason: String,
    },
}

pub fn access_key(value: &str) -> Result<(), ValidationError> {
    if ACCESS_KEY.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::AccessKey)
    }
}

pub fn secret_key(value: &str) -> Result<(), ValidationError> {
    if SECRET_KEY.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::SecretKey)
    }
}

/// Check, channel and incident identifiers share one shape.
pub fn ident<'a>(kind: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    if IDENT.is_match(value) {
        Ok(value)
    } else {
        Err(ValidationError::Ident {
            kind,
            value: value.to_string(),
        })
    }
}

pub fn http_method(value: &str) -> Result<String, ValidationError> {
    let upper = value.to_ascii_uppercase();
    if METHODS.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(ValidationError::Value {
            option: "method",
            reason: format!("'{value}' is not one of {}", METHODS.join(", ")),
        })
    }
}

pub fn resource_url(value: &str) -> Result<(), ValidationError> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ValidationError::Value {
            option: "resource",
            reason: format!("'{value}' is not an http(s) URL"),
        }),
    }
}
