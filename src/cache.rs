use std::any::Any;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use lru::LruCache;
use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::client::QuestApi;
use crate::error::{LibError, Result};
use crate::models::{ListQuery, decode_list};
use crate::transport::{ApiRequest, Transport};

#[derive(Clone)]
struct CachedEntry {
    etag: String,
    payload: Arc<dyn Any + Send + Sync>,
}

/// Bounded, shareable ETag cache keyed by fully resolved URL. Never
/// invalidated implicitly after writes.
#[derive(Clone)]
pub struct EtagCache {
    inner: Arc<Mutex<LruCache<String, CachedEntry>>>,
}

impl EtagCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CachedEntry>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last known etag for `url`, without touching recency.
    pub fn etag(&self, url: &str) -> Option<String> {
        self.lock().peek(url).map(|entry| entry.etag.clone())
    }

    pub fn get<T: Send + Sync + 'static>(&self, url: &str) -> Option<Arc<T>> {
        let payload = self.lock().get(url).map(|entry| Arc::clone(&entry.payload))?;
        payload.downcast::<T>().ok()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, url: String, etag: String, payload: Arc<T>) {
        self.lock().put(url, CachedEntry { etag, payload });
    }

    pub fn invalidate(&self, url: &str) -> bool {
        self.lock().pop(url).is_some()
    }

    /// Drops every entry whose URL starts with `prefix`. Returns how many were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut cache = self.lock();
        let stale: Vec<String> = cache
            .iter()
            .filter(|(url, _)| url.starts_with(prefix))
            .map(|(url, _)| url.clone())
            .collect();
        for url in &stale {
            cache.pop(url);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    /// `/admin/workspaces/{workspace}/{resource}`
    PathScoped,
    /// `/admin/{resource}?workspace_id={workspace}`
    QueryScoped,
    /// `/{resource}`, read-only.
    Public,
}

pub const ROUTE_CASCADE: [RouteKind; 3] =
    [RouteKind::PathScoped, RouteKind::QueryScoped, RouteKind::Public];

/// Resolves list reads against backends whose route layout differs per deployment.
#[derive(Clone)]
pub struct ListResolver {
    transport: Arc<dyn Transport>,
    base_url: String,
    workspace_id: Option<String>,
    cache: EtagCache,
}

impl ListResolver {
    pub fn new(api: &QuestApi, cache: EtagCache) -> Self {
        Self {
            transport: api.transport(),
            base_url: api.base_url().to_string(),
            workspace_id: api.workspace_id().map(str::to_string),
            cache,
        }
    }

    pub fn cache(&self) -> &EtagCache {
        &self.cache
    }

    /// Builds the fully resolved URL for one route of the cascade.
    pub fn route_url(&self, route: RouteKind, resource: &str, query: &ListQuery) -> Result<String> {
        let workspace = self.workspace_id.as_deref();
        let (path, mut pairs) = match (route, workspace) {
            (RouteKind::PathScoped, Some(workspace)) => (
                format!("{}/admin/workspaces/{}/{}", self.base_url, workspace, resource),
                Vec::new(),
            ),
            (RouteKind::PathScoped, None) => {
                return Err(LibError::invalid(
                    "Workspace route needs a workspace id",
                    anyhow!("no workspace configured for {}", resource),
                ));
            }
            (RouteKind::QueryScoped, workspace) => (
                format!("{}/admin/{}", self.base_url, resource),
                workspace
                    .map(|workspace| vec![("workspace_id".to_string(), workspace.to_string())])
                    .unwrap_or_default(),
            ),
            (RouteKind::Public, _) => (format!("{}/{}", self.base_url, resource), Vec::new()),
        };
        pairs.extend(query.pairs());

        let mut url = Url::parse(&path).map_err(|err| {
            LibError::invalid("Invalid list url", anyhow!("cannot parse {}: {}", path, err))
        })?;
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url.to_string())
    }

    /// Lists `resource`, trying each route in [`ROUTE_CASCADE`] order.
    ///
    /// A 404 moves on to the next route; any other failure is returned at once.
    pub async fn list<T>(&self, resource: &str, query: &ListQuery) -> Result<Arc<Vec<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let mut last_miss = None;
        for route in ROUTE_CASCADE {
            if route == RouteKind::PathScoped && self.workspace_id.is_none() {
                continue;
            }
            let url = self.route_url(route, resource, query)?;
            match self.fetch_cached::<T>(&url).await {
                Ok(items) => return Ok(items),
                Err(err) if err.is_not_found() => {
                    tracing::debug!(?route, %url, "list route not found, falling back");
                    last_miss = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_miss.unwrap_or_else(|| {
            LibError::not_found(
                "No list route is available",
                anyhow!("all routes for {} returned 404", resource),
            )
        }))
    }

    pub async fn list_nodes<T>(&self, query: &ListQuery) -> Result<Arc<Vec<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.list("nodes", query).await
    }

    /// Conditional GET of one resolved URL.
    pub async fn fetch_cached<T>(&self, url: &str) -> Result<Arc<Vec<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let etag = self.cache.etag(url);
        let conditional = etag.is_some();
        let request = ApiRequest::get(url)
            .workspace(self.workspace_id.as_deref())
            .if_none_match(etag);
        let mut response = self.transport.send(request).await?;

        if response.is_not_modified() {
            if let Some(items) = self.cache.get::<Vec<T>>(url) {
                tracing::debug!(%url, "list cache hit");
                return Ok(items);
            }
            if !conditional {
                return Err(LibError::http(
                    "Server reported not modified for an uncached list",
                    anyhow!("304 for {} without a cache entry", url),
                ));
            }
            // Entry was evicted while the request was in flight.
            tracing::debug!(%url, "cached list evicted, refetching");
            let request = ApiRequest::get(url).workspace(self.workspace_id.as_deref());
            response = self.transport.send(request).await?;
            if response.is_not_modified() {
                return Err(LibError::http(
                    "Server reported not modified for an uncached list",
                    anyhow!("304 for unconditional request to {}", url),
                ));
            }
        }

        let response = response.error_for_status(url)?;
        let items = Arc::new(decode_list::<T>(&response.body)?);
        match response.etag {
            Some(etag) => self.cache.insert(url.to_string(), etag, Arc::clone(&items)),
            None => {
                self.cache.invalidate(url);
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;
    use crate::config::EditorConfig;
    use crate::error::ErrorKind;
    use crate::transport::testing::ScriptedTransport;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Row {
        id: u32,
        title: String,
    }

    fn resolver(transport: Arc<ScriptedTransport>, capacity: usize) -> ListResolver {
        let config = EditorConfig::new("http://backend").with_workspace("ws1");
        let api = QuestApi::new(transport, &config);
        ListResolver::new(&api, EtagCache::new(NonZeroUsize::new(capacity).unwrap()))
    }

    const ROWS: &str = r#"{"items": [{"id": 1, "title": "Intro"}, {"id": 2, "title": "Cave"}]}"#;

    #[tokio::test]
    async fn not_modified_returns_cached_payload_without_parsing() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(200, Some("\"e1\""), ROWS);
        // A body that would fail to parse proves the 304 path skips decoding.
        transport.push(304, None, "not json");
        let resolver = resolver(Arc::clone(&transport), 8);
        let query = ListQuery::default().sort("title");

        let first = resolver.list_nodes::<Row>(&query).await.expect("first fetch");
        let second = resolver.list_nodes::<Row>(&query).await.expect("second fetch");

        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        let requests = transport.requests();
        assert_eq!(requests[0].if_none_match, None);
        assert_eq!(requests[1].if_none_match.as_deref(), Some("\"e1\""));
        assert_eq!(requests[1].url, requests[0].url);
    }

    #[tokio::test]
    async fn fresh_200_replaces_entry() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(200, Some("\"e1\""), ROWS);
        transport.push(200, Some("\"e2\""), r#"[{"id": 3, "title": "Boss"}]"#);
        let resolver = resolver(Arc::clone(&transport), 8);
        let query = ListQuery::default();

        resolver.list_nodes::<Row>(&query).await.unwrap();
        let second = resolver.list_nodes::<Row>(&query).await.unwrap();
        assert_eq!(second.as_slice(), &[Row { id: 3, title: "Boss".to_string() }]);

        let url = resolver.route_url(RouteKind::PathScoped, "nodes", &query).unwrap();
        assert_eq!(resolver.cache().etag(&url).as_deref(), Some("\"e2\""));
    }

    #[tokio::test]
    async fn not_found_falls_through_to_next_route() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(404, None, "");
        transport.push(200, Some("\"q1\""), ROWS);
        let resolver = resolver(Arc::clone(&transport), 8);
        let query = ListQuery::default().filter("status", "draft");

        let rows = resolver.list_nodes::<Row>(&query).await.expect("fallback should succeed");
        assert_eq!(rows.len(), 2);

        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "http://backend/admin/workspaces/ws1/nodes?status=draft"
        );
        assert_eq!(
            requests[1].url,
            "http://backend/admin/nodes?workspace_id=ws1&status=draft"
        );
    }

    #[tokio::test]
    async fn public_route_is_last_resort() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(404, None, "");
        transport.push(404, None, "");
        transport.push(200, None, "[]");
        let resolver = resolver(Arc::clone(&transport), 8);

        let rows = resolver
            .list_nodes::<Row>(&ListQuery::default())
            .await
            .expect("public route should succeed");
        assert!(rows.is_empty());
        assert_eq!(transport.requests()[2].url, "http://backend/nodes");
        assert!(resolver.cache().is_empty(), "responses without etag are not cached");
    }

    #[tokio::test]
    async fn non_404_errors_abort_the_cascade() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(500, None, "boom");
        transport.push(200, None, ROWS);
        let resolver = resolver(Arc::clone(&transport), 8);

        let err = resolver
            .list_nodes::<Row>(&ListQuery::default())
            .await
            .expect_err("500 should abort");
        assert_eq!(err.kind, ErrorKind::Http);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn all_routes_missing_is_not_found() {
        let transport = Arc::new(ScriptedTransport::default());
        for _ in 0..3 {
            transport.push(404, None, "");
        }
        let err = resolver(transport, 8)
            .list_nodes::<Row>(&ListQuery::default())
            .await
            .expect_err("every route missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn without_workspace_the_workspace_route_is_skipped() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(404, None, "");
        transport.push(200, None, ROWS);
        let api = QuestApi::new(Arc::clone(&transport) as Arc<dyn Transport>, &EditorConfig::new("http://backend"));
        let resolver = ListResolver::new(&api, EtagCache::new(NonZeroUsize::new(4).unwrap()));

        let rows = resolver
            .list_nodes::<Row>(&ListQuery::default())
            .await
            .expect("public route should succeed");
        assert_eq!(rows.len(), 2);

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["http://backend/admin/nodes", "http://backend/nodes"]);
        assert!(resolver
            .route_url(RouteKind::PathScoped, "nodes", &ListQuery::default())
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn entry_evicted_during_request_is_refetched() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(200, Some("\"e1\""), ROWS);
        transport.push_delayed(304, None, "", Some(Duration::from_millis(50)));
        transport.push(200, Some("\"e2\""), r#"[{"id": 3, "title": "Boss"}]"#);
        let resolver = resolver(Arc::clone(&transport), 8);
        let query = ListQuery::default();
        let url = resolver.route_url(RouteKind::PathScoped, "nodes", &query).unwrap();

        resolver.list_nodes::<Row>(&query).await.unwrap();
        let evict = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.cache().invalidate(&url);
        };
        let (rows, ()) = tokio::join!(resolver.list_nodes::<Row>(&query), evict);

        let rows = rows.expect("refetch should succeed");
        assert_eq!(rows.as_slice(), &[Row { id: 3, title: "Boss".to_string() }]);
        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].if_none_match.as_deref(), Some("\"e1\""));
        assert_eq!(requests[2].if_none_match, None);
        assert_eq!(resolver.cache().etag(&url).as_deref(), Some("\"e2\""));
    }

    #[test]
    fn cache_is_bounded_and_invalidatable() {
        let cache = EtagCache::new(NonZeroUsize::new(2).unwrap());
        cache.insert("http://b/nodes?page=1".to_string(), "a".to_string(), Arc::new(vec![1]));
        cache.insert("http://b/nodes?page=2".to_string(), "b".to_string(), Arc::new(vec![2]));
        cache.insert("http://b/tags".to_string(), "c".to_string(), Arc::new(vec![3]));

        assert_eq!(cache.len(), 2);
        assert!(cache.etag("http://b/nodes?page=1").is_none(), "oldest entry is evicted");
        assert_eq!(cache.invalidate_prefix("http://b/nodes"), 1);
        assert!(cache.invalidate("http://b/tags"));
        assert!(cache.is_empty());
    }

    #[test]
    fn cached_payload_of_other_type_is_a_miss() {
        let cache = EtagCache::new(NonZeroUsize::new(2).unwrap());
        cache.insert("u".to_string(), "e".to_string(), Arc::new(vec![1u8]));
        assert!(cache.get::<Vec<String>>("u").is_none());
        assert_eq!(cache.get::<Vec<u8>>("u").as_deref(), Some(&vec![1u8]));
    }
}
