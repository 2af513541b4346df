//! Credentials: cookies from browser storage, tokens from the home page.

mod storage;
mod tokens;

pub use storage::{
    AUTH_JSON_ENV, AUTH_JSON_FILE_ENV, REQUIRED_COOKIES, StorageSource, StorageState,
    StoredCookie, extract_cookies, is_allowed_auth_domain, is_google_domain, load_cookies,
    load_storage_state, resolve_storage_source,
};
pub use tokens::{SessionTokens, TokenPatterns, cookie_header, fetch_tokens};
