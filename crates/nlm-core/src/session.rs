//! Shared session credentials and single-flight refresh.
//!
//! The coordinator is the only mutable state shared across call chains.
//! Readers take a [`snapshot`](SessionCoordinator::snapshot) of the current
//! credentials together with an epoch number; a refresh replaces the CSRF
//! token and session ID under one write lock and bumps the epoch.
//!
//! A chain that saw auth expiry passes the epoch it observed to
//! [`refresh_after`](SessionCoordinator::refresh_after). If another chain has
//! already refreshed past that epoch, the new tokens are reused and no page
//! fetch happens, so N chains expiring together cause one refresh.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::Result;
use crate::auth::{SessionTokens, TokenPatterns, cookie_header, fetch_tokens};
use crate::http::HttpTransport;

/// CSRF token, session ID and cookie set for authenticated calls
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub csrf_token: String,
    pub session_id: String,
    pub cookies: BTreeMap<String, String>,
}

impl Credentials {
    #[must_use]
    pub fn new(tokens: SessionTokens, cookies: BTreeMap<String, String>) -> Self {
        Self {
            csrf_token: tokens.csrf_token,
            session_id: tokens.session_id,
            cookies,
        }
    }

    #[must_use]
    pub fn cookie_header(&self) -> String {
        cookie_header(&self.cookies)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("csrf_token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct SessionCoordinator<T: ?Sized> {
    transport: Arc<T>,
    home_url: String,
    patterns: TokenPatterns,
    credentials: RwLock<Credentials>,
    epoch: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl<T: HttpTransport + ?Sized> SessionCoordinator<T> {
    /// Wrap credentials that are already known to be valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the token patterns fail to compile.
    pub fn new(transport: Arc<T>, home_url: impl Into<String>, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            transport,
            home_url: home_url.into(),
            patterns: TokenPatterns::new()?,
            credentials: RwLock::new(credentials),
            epoch: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Derive tokens for `cookies` by fetching the home page once.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AuthExpired`] if the cookies no longer
    /// authenticate, or any transport error.
    pub async fn initialize(
        transport: Arc<T>,
        home_url: impl Into<String>,
        cookies: BTreeMap<String, String>,
    ) -> Result<Self> {
        let home_url = home_url.into();
        let patterns = TokenPatterns::new()?;
        let tokens = fetch_tokens(transport.as_ref(), &patterns, &home_url, &cookies).await?;
        debug!(session_id = %tokens.session_id, "Session initialized");

        Ok(Self {
            transport,
            home_url,
            patterns,
            credentials: RwLock::new(Credentials::new(tokens, cookies)),
            epoch: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Current epoch and a copy of the credentials, read together.
    pub async fn snapshot(&self) -> (u64, Credentials) {
        let credentials = self.credentials.read().await;
        (self.epoch.load(Ordering::Acquire), credentials.clone())
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Refresh tokens unless a refresh already completed after `observed_epoch`.
    ///
    /// Returns the epoch callers should now hold.
    ///
    /// # Errors
    ///
    /// Returns the fetch or extraction error; credentials are left untouched.
    pub async fn refresh_after(&self, observed_epoch: u64) -> Result<u64> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.epoch.load(Ordering::Acquire);
        if current > observed_epoch {
            debug!(observed_epoch, current, "Reusing completed session refresh");
            return Ok(current);
        }

        let cookies = self.credentials.read().await.cookies.clone();
        let tokens = fetch_tokens(self.transport.as_ref(), &self.patterns, &self.home_url, &cookies)
            .await
            .inspect_err(|e| warn!("Session refresh failed: {e}"))?;

        let mut credentials = self.credentials.write().await;
        credentials.csrf_token = tokens.csrf_token;
        credentials.session_id = tokens.session_id;
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        drop(credentials);

        info!(epoch, "Session tokens refreshed");
        Ok(epoch)
    }

    /// Unconditional refresh.
    ///
    /// # Errors
    ///
    /// Same as [`refresh_after`](Self::refresh_after).
    pub async fn refresh(&self) -> Result<u64> {
        let observed = self.epoch();
        self.refresh_after(observed).await
    }
}
