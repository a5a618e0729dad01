//! Elasticsearch search backend

use super::{OccurrenceRecord, RECORD_ID_FIELD, SearchBackend};
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::query::CompiledQuery;
use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

/// Backend querying an Elasticsearch index over HTTP
///
/// Counts through `_count` and pages through `_search` sorted on the record
/// id, so that jobs reading disjoint offset ranges see disjoint records.
/// Pages inside the index's result window use `from`/`size`. Deeper pages
/// continue with `search_after` from the caller's cursor, or from a cursor
/// found by walking the sort keys up to the requested offset.
#[derive(Clone, Debug)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    count_url: Url,
    search_url: Url,
    max_result_window: u64,
}

impl ElasticsearchBackend {
    /// Create a backend from the search settings
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let mut base = Url::parse(&config.url).map_err(|e| Error::Config {
            message: format!("invalid search url '{}': {}", config.url, e),
            key: Some("url".to_string()),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let index = config.index.trim_matches('/');
        let join = |endpoint: &str| {
            base.join(&format!("{index}/{endpoint}"))
                .map_err(|e| Error::Config {
                    message: format!("invalid search index '{}': {}", config.index, e),
                    key: Some("index".to_string()),
                })
        };
        let count_url = join("_count")?;
        let search_url = join("_search")?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("occurrence-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            count_url,
            search_url,
            max_result_window: config.max_result_window.max(1),
        })
    }

    fn search_body(query: &CompiledQuery, size: u64) -> Value {
        json!({
            "query": query.query_clause(),
            "size": size,
            "sort": [{ RECORD_ID_FIELD: "asc" }],
            "track_total_hits": false,
        })
    }

    /// Sort key of the record at `position - 1`; `None` past the last record
    ///
    /// Reads only sort values, a result window at a time.
    async fn seek(&self, query: &CompiledQuery, position: u64) -> Result<Option<Value>> {
        let mut after: Option<Value> = None;
        let mut skipped = 0u64;

        while skipped < position {
            let size = (position - skipped).min(self.max_result_window);
            let mut body = Self::search_body(query, size);
            body["_source"] = json!(false);
            if let Some(key) = &after {
                body["search_after"] = json!([key]);
            }

            let response = self.post(&self.search_url, &body).await?;
            let hits = hits(&response)?;
            if (hits.len() as u64) < size {
                return Ok(None);
            }
            let Some(key) = hits.last().and_then(|hit| hit["sort"].get(0)) else {
                return Err(Error::Search("search hit without sort values".to_string()));
            };
            after = Some(key.clone());
            skipped += size;
        }

        tracing::debug!(position, "search cursor positioned");
        Ok(after)
    }

    async fn post(&self, url: &Url, body: &Value) -> Result<Value> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Search(format!(
                "{} returned {}: {}",
                url,
                status,
                text.chars().take(500).collect::<String>()
            )));
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn count(&self, query: &CompiledQuery) -> Result<u64> {
        let body = json!({ "query": query.query_clause() });
        let response = self.post(&self.count_url, &body).await?;

        response["count"]
            .as_u64()
            .ok_or_else(|| Error::Search(format!("count response without count: {response}")))
    }

    async fn fetch(
        &self,
        query: &CompiledQuery,
        from: u64,
        size: u64,
        after: Option<&Value>,
    ) -> Result<Vec<OccurrenceRecord>> {
        let mut body = Self::search_body(query, size);
        match after {
            Some(key) => body["search_after"] = json!([key]),
            None if from.saturating_add(size) <= self.max_result_window => {
                body["from"] = json!(from);
            }
            None => match self.seek(query, from).await? {
                Some(key) => body["search_after"] = json!([key]),
                None => return Ok(Vec::new()),
            },
        }
        let response = self.post(&self.search_url, &body).await?;

        let hits = hits(&response)?;
        tracing::trace!(from, size, hits = hits.len(), "search page fetched");

        Ok(hits
            .iter()
            .map(|hit| OccurrenceRecord::from_source(hit["_source"].clone()))
            .collect())
    }
}

fn hits(response: &Value) -> Result<&Vec<Value>> {
    response["hits"]["hits"]
        .as_array()
        .ok_or_else(|| Error::Search("search response without hits".to_string()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{Predicate, SearchParameter};
    use crate::query::QueryCompiler;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> ElasticsearchBackend {
        windowed_backend(server, 10_000)
    }

    fn windowed_backend(server: &MockServer, max_result_window: u64) -> ElasticsearchBackend {
        ElasticsearchBackend::new(&SearchConfig {
            url: server.uri(),
            index: "occurrence".to_string(),
            page_size: 50,
            request_timeout: Duration::from_secs(5),
            max_result_window,
        })
        .unwrap()
    }

    fn sort_hits(ids: std::ops::Range<u64>) -> Value {
        let hits: Vec<Value> = ids.map(|id| json!({ "sort": [id] })).collect();
        json!({ "hits": { "hits": hits } })
    }

    fn source_hits(ids: std::ops::Range<u64>) -> Value {
        let hits: Vec<Value> = ids
            .map(|id| json!({ "_source": { "gbifID": id }, "sort": [id] }))
            .collect();
        json!({ "hits": { "hits": hits } })
    }

    fn year_query() -> CompiledQuery {
        QueryCompiler::new()
            .compile(&Predicate::equals(SearchParameter::Year, "2000"))
            .unwrap()
    }

    #[tokio::test]
    async fn count_posts_query_clause() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_count"))
            .and(body_partial_json(json!({
                "query": { "bool": { "must": [ { "match": { "YEAR": "2000" } } ] } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 1234 })))
            .expect(1)
            .mount(&server)
            .await;

        let count = backend_for(&server).count(&year_query()).await.unwrap();

        assert_eq!(count, 1234);
    }

    #[tokio::test]
    async fn fetch_pages_with_from_and_size() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_search"))
            .and(body_partial_json(json!({ "from": 600, "size": 300 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "hits": [
                    { "_source": { "gbifID": 1, "datasetKey": "2c2f9d4e-4a2c-4a3b-9f55-1f2b0c4f3e10" } },
                    { "_source": { "gbifID": 2, "license": "CC_BY_4_0" } }
                ] }
            })))
            .mount(&server)
            .await;

        let records = backend_for(&server)
            .fetch(&year_query(), 600, 300, None)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].text("gbifID").as_deref(), Some("2"));
        assert!(records[0].dataset_key().is_some());
    }

    #[tokio::test]
    async fn offset_past_result_window_pages_with_search_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_search"))
            .and(body_partial_json(json!({ "size": 100, "_source": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(sort_hits(0..100)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_search"))
            .and(body_partial_json(json!({ "size": 50, "_source": false, "search_after": [99] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(sort_hits(100..150)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_search"))
            .and(body_partial_json(json!({ "size": 50, "search_after": [149] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(source_hits(150..152)))
            .expect(1)
            .mount(&server)
            .await;

        let records = windowed_backend(&server, 100)
            .fetch(&year_query(), 150, 50, None)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text("gbifID").as_deref(), Some("150"));
        for request in server.received_requests().await.unwrap() {
            let body: Value = request.body_json().unwrap();
            assert!(body.get("from").is_none(), "deep page sent an offset: {body}");
        }
    }

    #[tokio::test]
    async fn cursor_continues_without_seeking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_search"))
            .and(body_partial_json(json!({ "size": 50, "search_after": [14999] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(source_hits(15000..15050)))
            .expect(1)
            .mount(&server)
            .await;

        let records = backend_for(&server)
            .fetch(&year_query(), 15_000, 50, Some(&json!(14999)))
            .await
            .unwrap();

        assert_eq!(records.len(), 50);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn seek_past_last_record_returns_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_search"))
            .and(body_partial_json(json!({ "size": 100, "_source": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(sort_hits(0..80)))
            .mount(&server)
            .await;

        let records = windowed_backend(&server, 100)
            .fetch(&year_query(), 150, 50, None)
            .await
            .unwrap();

        assert!(records.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_becomes_search_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_count"))
            .respond_with(ResponseTemplate::new(503).set_body_string("cluster unavailable"))
            .mount(&server)
            .await;

        let err = backend_for(&server).count(&year_query()).await.unwrap_err();

        match err {
            Error::Search(message) => assert!(message.contains("503")),
            other => panic!("expected Search error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_without_hits_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/occurrence/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "took": 3 })))
            .mount(&server)
            .await;

        let err = backend_for(&server)
            .fetch(&year_query(), 0, 10, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Search(_)));
    }

    #[test]
    fn invalid_url_is_a_config_error() {
        let err = ElasticsearchBackend::new(&SearchConfig {
            url: "not a url".to_string(),
            ..SearchConfig::default()
        })
        .unwrap_err();

        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let backend = ElasticsearchBackend::new(&SearchConfig {
            url: "http://search.local:9200/es".to_string(),
            index: "occurrence".to_string(),
            ..SearchConfig::default()
        })
        .unwrap();

        assert_eq!(
            backend.search_url.as_str(),
            "http://search.local:9200/es/occurrence/_search"
        );
    }
}
