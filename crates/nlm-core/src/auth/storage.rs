//! Read-only loading of browser storage state.
//!
//! Cookies come from a Playwright `storage_state.json` (or the same document
//! inline in an environment variable). Only Google auth domains are kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Path to a storage state file
pub const AUTH_JSON_FILE_ENV: &str = "NLM_AUTH_JSON_FILE";

/// Inline storage state JSON
pub const AUTH_JSON_ENV: &str = "NLM_AUTH_JSON";

/// Cookies that must be present for any authenticated call
pub const REQUIRED_COOKIES: &[&str] = &["SID"];

const BASE_DOMAIN: &str = ".google.com";

const ALLOWED_COOKIE_DOMAINS: &[&str] = &[
    BASE_DOMAIN,
    "notebooklm.google.com",
    ".googleusercontent.com",
];

/// Suffixes after `.google.` where regional auth cookies are set
const GOOGLE_REGIONAL_CCTLDS: &[&str] = &[
    "com.sg", "com.au", "com.br", "com.mx", "com.ar", "com.hk", "com.tw", "com.my", "com.ph",
    "com.vn", "com.pk", "com.bd", "com.ng", "com.eg", "com.tr", "com.ua", "com.co", "com.pe",
    "com.sa", "com.ae", "co.uk", "co.jp", "co.in", "co.kr", "co.za", "co.nz", "co.id", "co.th",
    "co.il", "co.ve", "co.cr", "co.ke", "co.ug", "co.tz", "co.ma", "co.ao", "co.mz", "co.zw",
    "co.bw", "cn", "de", "fr", "it", "es", "nl", "pl", "ru", "ca", "be", "at", "ch", "se", "no",
    "dk", "fi", "pt", "gr", "cz", "ro", "hu", "ie", "sk", "bg", "hr", "si", "lt", "lv", "ee",
    "lu", "cl", "cat",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoredCookie {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub domain: String,
}

/// Base `.google.com` or an allowlisted regional Google domain.
#[must_use]
pub fn is_google_domain(domain: &str) -> bool {
    if domain == BASE_DOMAIN {
        return true;
    }
    domain
        .strip_prefix(".google.")
        .is_some_and(|suffix| GOOGLE_REGIONAL_CCTLDS.contains(&suffix))
}

#[must_use]
pub fn is_allowed_auth_domain(domain: &str) -> bool {
    ALLOWED_COOKIE_DOMAINS.contains(&domain) || is_google_domain(domain)
}

/// Keep allowlisted cookies, preferring `.google.com` values on duplicates.
///
/// # Errors
///
/// Returns [`Error::AuthExpired`] if a required cookie is missing.
pub fn extract_cookies(state: &StorageState) -> Result<BTreeMap<String, String>> {
    let mut cookies = BTreeMap::new();
    let mut origins: BTreeMap<&str, &str> = BTreeMap::new();

    for cookie in &state.cookies {
        if cookie.name.is_empty() || !is_allowed_auth_domain(&cookie.domain) {
            continue;
        }

        let is_base = cookie.domain == BASE_DOMAIN;
        match origins.get(cookie.name.as_str()) {
            Some(kept) if !is_base => {
                debug!(
                    "Cookie {}: ignoring duplicate from {} (keeping {kept})",
                    cookie.name, cookie.domain
                );
            }
            _ => {
                cookies.insert(cookie.name.clone(), cookie.value.clone());
                origins.insert(&cookie.name, &cookie.domain);
            }
        }
    }

    debug!(count = cookies.len(), "Extracted auth cookies");

    let missing: Vec<&str> = REQUIRED_COOKIES
        .iter()
        .copied()
        .filter(|name| !cookies.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        let domains: Vec<&str> = state
            .cookies
            .iter()
            .map(|c| c.domain.as_str())
            .filter(|d| d.contains("google"))
            .collect();
        return Err(Error::AuthExpired(format!(
            "Missing required cookies {missing:?} (google domains in storage: {domains:?})"
        )));
    }

    Ok(cookies)
}

/// Where the storage state comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSource {
    File(PathBuf),
    Inline(String),
}

/// Pick the storage source: explicit path, then `NLM_AUTH_JSON_FILE`, then
/// `NLM_AUTH_JSON`, then `default_path`.
///
/// # Errors
///
/// Returns [`Error::Config`] when an environment variable is set but empty.
pub fn resolve_storage_source(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
    default_path: &Path,
) -> Result<StorageSource> {
    if let Some(path) = explicit {
        return Ok(StorageSource::File(path.to_path_buf()));
    }

    if let Some(raw) = lookup(AUTH_JSON_FILE_ENV) {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Config(format!(
                "{AUTH_JSON_FILE_ENV} is set but empty"
            )));
        }
        return Ok(StorageSource::File(PathBuf::from(raw)));
    }

    if let Some(raw) = lookup(AUTH_JSON_ENV) {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Config(format!("{AUTH_JSON_ENV} is set but empty")));
        }
        return Ok(StorageSource::Inline(raw.to_string()));
    }

    Ok(StorageSource::File(default_path.to_path_buf()))
}

/// # Errors
///
/// Returns [`Error::Config`] for a missing file or a document without a
/// `cookies` key, and [`Error::Io`]/[`Error::Json`] for unreadable input.
pub fn load_storage_state(source: &StorageSource) -> Result<StorageState> {
    let content = match source {
        StorageSource::File(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Storage file not found: {}",
                    path.display()
                )));
            }
            std::fs::read_to_string(path)?
        }
        StorageSource::Inline(json) => json.clone(),
    };

    let value: Value = serde_json::from_str(&content)?;
    if value.get("cookies").is_none() {
        return Err(Error::Config(
            "Storage state must be an object with a 'cookies' key".into(),
        ));
    }
    Ok(serde_json::from_value(value)?)
}

/// Resolve, load and filter cookies using the process environment.
///
/// # Errors
///
/// Any error from resolving, loading or extracting.
pub fn load_cookies(
    explicit: Option<&Path>,
    default_path: &Path,
) -> Result<BTreeMap<String, String>> {
    let source = resolve_storage_source(explicit, |key| std::env::var(key).ok(), default_path)?;
    debug!(?source, "Loading storage state");
    extract_cookies(&load_storage_state(&source)?)
}
