//! Host environment abstraction.
//!
//! A [`Platform`] is detected or chosen once, when a session is built. Page
//! hosts expose a cookie jar, a local store, the current page URL and the
//! browser's user agent; headless hosts expose none of them and disable
//! persistence altogether.

use std::sync::Arc;

use reqwest::Url;

use crate::storage::{CookieJar, LocalStore};

/// Capabilities of the environment a session runs in.
pub trait Platform: Send + Sync {
    /// `true` for server-side hosts without persistence or a page URL.
    fn is_headless(&self) -> bool;

    /// Host cookie jar, if any.
    fn cookie_jar(&self) -> Option<Arc<dyn CookieJar>>;

    /// Host local store, if any.
    fn local_store(&self) -> Option<Arc<dyn LocalStore>>;

    /// Full URL of the current page.
    fn page_url(&self) -> Option<String>;

    /// User agent reported by the host.
    fn user_agent(&self) -> Option<String>;

    /// Host name of the current page.
    fn hostname(&self) -> Option<String> {
        let url = Url::parse(&self.page_url()?).ok()?;
        url.host_str().map(str::to_string)
    }

    /// Query string of the current page, including the leading `?`.
    fn query_string(&self) -> Option<String> {
        let url = Url::parse(&self.page_url()?).ok()?;
        url.query().map(|q| format!("?{}", q))
    }
}

/// Server-side host: no persistence, no page.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPlatform;

impl Platform for HeadlessPlatform {
    fn is_headless(&self) -> bool {
        true
    }

    fn cookie_jar(&self) -> Option<Arc<dyn CookieJar>> {
        None
    }

    fn local_store(&self) -> Option<Arc<dyn LocalStore>> {
        None
    }

    fn page_url(&self) -> Option<String> {
        None
    }

    fn user_agent(&self) -> Option<String> {
        None
    }
}

/// Browser-like host with a cookie jar and/or a local store.
#[derive(Clone, Default)]
pub struct PagePlatform {
    cookies: Option<Arc<dyn CookieJar>>,
    local: Option<Arc<dyn LocalStore>>,
    url: Option<String>,
    user_agent: Option<String>,
}

impl PagePlatform {
    /// Create a page host with no capabilities attached yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cookie jar.
    pub fn with_cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookies = Some(jar);
        self
    }

    /// Attach a local store.
    pub fn with_local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.local = Some(store);
        self
    }

    /// Set the current page URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the browser user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

impl Platform for PagePlatform {
    fn is_headless(&self) -> bool {
        false
    }

    fn cookie_jar(&self) -> Option<Arc<dyn CookieJar>> {
        self.cookies.clone()
    }

    fn local_store(&self) -> Option<Arc<dyn LocalStore>> {
        self.local.clone()
    }

    fn page_url(&self) -> Option<String> {
        self.url.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }
}
