//! Integration tests for identity resolution on page hosts
//!
//! Sessions are built over in-memory cookie jars and local stores; no
//! request is made while resolving identity.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use abtest_session::config::Config;
use abtest_session::experiment::Session;
use abtest_session::identity::SESSION_IDLE_TIMEOUT_MS;
use abtest_session::platform::PagePlatform;
use abtest_session::storage::{LocalStore, MemoryCookieJar, MemoryLocalStore, StorageLocation};
use abtest_session::HttpTransport;

const SESSION_DATA_KEY: &str = "_constructorio_search_session";
const SESSION_ID_KEY: &str = "_constructorio_search_session_id";
const LOCAL_CLIENT_ID_KEY: &str = "_constructorio_search_client_id";

struct Page {
    jar: Arc<MemoryCookieJar>,
    store: Arc<MemoryLocalStore>,
}

impl Page {
    fn new() -> Self {
        Self {
            jar: Arc::new(MemoryCookieJar::new()),
            store: Arc::new(MemoryLocalStore::new()),
        }
    }

    fn with_cookies(cookies: &[&str]) -> Self {
        Self {
            jar: Arc::new(MemoryCookieJar::with_cookies(cookies)),
            store: Arc::new(MemoryLocalStore::new()),
        }
    }

    async fn session(&self, config: Config) -> Session {
        self.session_at(config, "https://www.example.com/").await
    }

    async fn session_at(&self, config: Config, url: &str) -> Session {
        let platform = PagePlatform::new()
            .with_cookie_jar(self.jar.clone())
            .with_local_store(self.store.clone())
            .with_url(url);
        let transport = HttpTransport::new(&config.request).expect("Failed to create transport");
        Session::new(config, Arc::new(platform), Arc::new(transport)).await
    }

    async fn local(&self, key: &str) -> Option<String> {
        self.store.get_item(key).await.unwrap()
    }

    async fn set_session_record(&self, record: Value) {
        self.store
            .set_item(SESSION_DATA_KEY, &record.to_string())
            .await
            .unwrap();
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod client_id_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_client_id_generated_and_persisted_in_cookie() {
        let page = Page::new();
        let session = page.session(Config::default()).await;

        assert_eq!(session.client_id().len(), 36);
        assert_eq!(
            page.jar.get("ConstructorioID_client_id").as_deref(),
            Some(session.client_id())
        );

        // A second page view reuses the stored id.
        let again = page.session(Config::default()).await;
        assert_eq!(again.client_id(), session.client_id());
    }

    #[tokio::test]
    async fn test_legacy_cookie_migrates_to_local_store() {
        let page = Page::with_cookies(&["ConstructorioAB_client_id=legacy-visitor; path=/"]);
        let mut config = Config::default();
        config.identity.client_id_storage = StorageLocation::Local;

        let session = page.session(config).await;

        assert_eq!(session.client_id(), "legacy-visitor");
        assert_eq!(
            page.local(LOCAL_CLIENT_ID_KEY).await,
            Some("legacy-visitor".to_string())
        );
        assert_eq!(page.jar.get("ConstructorioAB_client_id"), None);
    }

    #[tokio::test]
    async fn test_cookie_client_id_migrates_to_local_store() {
        let page = Page::with_cookies(&["ConstructorioID_client_id=cookie-visitor; path=/"]);
        let mut config = Config::default();
        config.identity.client_id_storage = StorageLocation::Local;

        let session = page.session(config).await;

        assert_eq!(session.client_id(), "cookie-visitor");
        assert_eq!(
            page.local(LOCAL_CLIENT_ID_KEY).await,
            Some("cookie-visitor".to_string())
        );
        assert_eq!(page.jar.get("ConstructorioID_client_id"), None);
    }

    #[tokio::test]
    async fn test_persistence_disabled_leaves_storage_untouched() {
        let page = Page::new();
        let mut config = Config::default();
        config.identity.persist = false;

        let session = page.session(config).await;

        assert_eq!(session.client_id().len(), 36);
        assert_eq!(session.session_id(), 1);
        assert_eq!(session.session_is_new(), None);
        assert!(page.jar.is_empty());
        assert!(page.store.is_empty().await);
    }
}

#[cfg(test)]
mod session_id_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_first_visit_starts_session_one() {
        let page = Page::new();
        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 1);
        assert_eq!(session.session_is_new(), Some(true));
        assert_eq!(page.local(SESSION_ID_KEY).await, Some("1".to_string()));

        let record: Value =
            serde_json::from_str(&page.local(SESSION_DATA_KEY).await.unwrap()).unwrap();
        assert_eq!(record["sessionId"], json!(1));
        assert_eq!(record["newToBeacon"], json!(true));
        assert!(record["lastTime"].is_i64());
    }

    #[tokio::test]
    async fn test_recent_session_is_continued() {
        let page = Page::new();
        page.set_session_record(json!({"sessionId": 42, "lastTime": now_ms()}))
            .await;

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 42);
        assert_eq!(session.session_is_new(), Some(false));
    }

    #[tokio::test]
    async fn test_idle_session_rolls_over() {
        let page = Page::new();
        page.set_session_record(json!({
            "sessionId": 42,
            "lastTime": now_ms() - SESSION_IDLE_TIMEOUT_MS - 60_000
        }))
        .await;

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 43);
        assert_eq!(session.session_is_new(), Some(true));
        assert_eq!(page.local(SESSION_ID_KEY).await, Some("43".to_string()));
    }

    #[tokio::test]
    async fn test_exhausted_session_id_restarts_at_one() {
        let page = Page::new();
        page.set_session_record(json!({"sessionId": u64::MAX, "lastTime": 1}))
            .await;

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 1);
        assert_eq!(session.session_is_new(), Some(true));
        assert_eq!(page.local(SESSION_ID_KEY).await, Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_extreme_negative_last_time_rolls_over() {
        let page = Page::new();
        page.set_session_record(json!({"sessionId": 3, "lastTime": i64::MIN}))
            .await;

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 4);
        assert_eq!(session.session_is_new(), Some(true));
    }

    #[tokio::test]
    async fn test_session_id_with_trailing_garbage() {
        let page = Page::new();
        page.set_session_record(json!({"sessionId": "44,", "lastTime": now_ms()}))
            .await;

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 44);
        assert_eq!(session.session_is_new(), Some(false));
    }

    #[tokio::test]
    async fn test_unparseable_session_id_defaults_to_one() {
        let page = Page::new();
        page.set_session_record(json!({"sessionId": "abc", "lastTime": now_ms()}))
            .await;

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 1);
    }

    #[tokio::test]
    async fn test_pipe_delimited_record_is_read() {
        let page = Page::new();
        page.store
            .set_item(SESSION_DATA_KEY, &format!("7|{}", now_ms()))
            .await
            .unwrap();

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 7);
        assert_eq!(session.session_is_new(), Some(false));

        let stored = page.local(SESSION_DATA_KEY).await.unwrap();
        assert!(stored.starts_with('{'), "record rewritten as JSON: {}", stored);
    }

    #[tokio::test]
    async fn test_beacon_marker_carries_over() {
        let page = Page::new();
        page.set_session_record(json!({
            "sessionId": 5,
            "lastTime": now_ms(),
            "newToBeacon": true
        }))
        .await;

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 5);
        assert_eq!(session.new_to_beacon(), Some(true));
    }

    #[tokio::test]
    async fn test_explicit_session_id_skips_storage() {
        let page = Page::new();
        let mut config = Config::default();
        config.identity.session_id = Some(9);

        let session = page.session(config).await;

        assert_eq!(session.session_id(), 9);
        assert_eq!(session.session_is_new(), None);
        assert_eq!(page.local(SESSION_DATA_KEY).await, None);
    }

    #[tokio::test]
    async fn test_session_in_cookie_uses_inferred_domain() {
        let page = Page::new();
        let mut config = Config::default();
        config.identity.session_id_storage = StorageLocation::Cookie;

        let session = page
            .session_at(config, "https://www.constructor.co.uk/search?q=boots")
            .await;

        assert_eq!(
            session.storage().cookie_options().domain.as_deref(),
            Some("constructor.co.uk")
        );
        assert_eq!(page.jar.get("ConstructorioID_session_id"), Some("1".to_string()));
        assert!(page.jar.get("ConstructorioID_session").is_some());
    }

    #[tokio::test]
    async fn test_session_record_migrates_from_cookie_to_local() {
        let record = json!({"sessionId": 12, "lastTime": now_ms()}).to_string();
        let cookie = format!("ConstructorioID_session={}; path=/", record);
        let page = Page::with_cookies(&[cookie.as_str()]);

        let session = page.session(Config::default()).await;

        assert_eq!(session.session_id(), 12);
        assert_eq!(page.jar.get("ConstructorioID_session"), None);
        assert_eq!(page.local(SESSION_ID_KEY).await, Some("12".to_string()));
    }
}
