use crate::config::schema::ResolverConfig;
use crate::error::ResolveError;
use crate::models::ResolvedRecord;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Turns raw beacon URLs into displayable metadata.
///
/// Replies may be partial: URLs without a record in the result are simply
/// unresolved, which is not an error.
pub trait ResolutionService: Send + Sync {
    fn resolve(&self, urls: Vec<String>) -> BoxFuture<'static, Result<Vec<ResolvedRecord>, ResolveError>>;
}

#[derive(Serialize)]
struct ResolveRequest {
    urls: Vec<RequestedUrl>,
}

#[derive(Serialize)]
struct RequestedUrl {
    url: String,
}

#[derive(Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    results: Vec<ResolvedRecord>,
}

/// JSON-over-HTTP resolution service client.
#[derive(Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, ResolveError> {
        let mut endpoint = Url::parse(&config.endpoint)?;
        if let Some(key) = &config.api_key {
            endpoint.query_pairs_mut().append_pair("key", key);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { client, endpoint })
    }

    async fn request(
        client: reqwest::Client,
        endpoint: Url,
        urls: Vec<String>,
    ) -> Result<Vec<ResolvedRecord>, ResolveError> {
        let body = ResolveRequest {
            urls: urls.into_iter().map(|url| RequestedUrl { url }).collect(),
        };

        let response = client.post(endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status));
        }

        let parsed: ResolveResponse = response.json().await?;
        Ok(parsed.results)
    }
}

impl ResolutionService for HttpResolver {
    fn resolve(&self, urls: Vec<String>) -> BoxFuture<'static, Result<Vec<ResolvedRecord>, ResolveError>> {
        tracing::debug!(count = urls.len(), "Resolving URLs via {}", self.endpoint);
        Self::request(self.client.clone(), self.endpoint.clone(), urls).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_is_appended() {
        let config = ResolverConfig {
            endpoint: "http://127.0.0.1:9/resolve".to_string(),
            api_key: Some("secret".to_string()),
            timeout_ms: 100,
        };
        let resolver = HttpResolver::new(&config).unwrap();
        assert_eq!(resolver.endpoint.as_str(), "http://127.0.0.1:9/resolve?key=secret");
    }

    #[test]
    fn test_invalid_endpoint() {
        let config = ResolverConfig {
            endpoint: "not a url".to_string(),
            api_key: None,
            timeout_ms: 100,
        };
        assert!(matches!(
            HttpResolver::new(&config),
            Err(ResolveError::Endpoint(_))
        ));
    }

    #[test]
    fn test_response_tolerates_missing_optional_fields() {
        let parsed: ResolveResponse = serde_json::from_str(
            r#"{"results":[{"requestUrl":"https://a.com","resolvedUrl":"https://a.com/x","title":"A"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].description, "");

        let empty: ResolveResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let config = ResolverConfig {
            endpoint: "http://127.0.0.1:9/resolve".to_string(),
            api_key: None,
            timeout_ms: 500,
        };
        let resolver = HttpResolver::new(&config).unwrap();
        let result = resolver.resolve(vec!["https://a.com".to_string()]).await;
        assert!(matches!(result, Err(ResolveError::Transport(_))));
    }
}
