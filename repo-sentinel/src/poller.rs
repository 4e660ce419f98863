//! Conditional polling of repository events.

use crate::config::{ConfigError, Credential};
use crate::events::{decode_events, Event};
use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::registry::RepoRegistry;
use crate::repository::MonitoredRepository;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Media type requested from the events API.
const ACCEPT: &str = "application/vnd.github.v3+json";

/// Reasons a poll can fail.
#[derive(Debug, Error)]
pub enum PollFailure {
    /// The request could not be completed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an unexpected status.
    #[error("Unexpected response status {status}")]
    UnexpectedStatus { status: u16 },

    /// The response body was not a list of events.
    #[error("Failed to decode events: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request URL could not be built.
    #[error("Failed to build events URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Outcome of polling one repository.
#[derive(Debug)]
pub enum PollResult {
    /// The cache validator matched; nothing new.
    NoChange,
    /// Events in delivered order.
    Events(Vec<Event>),
    /// The poll failed; the cache token was left untouched.
    Failure(PollFailure),
}

/// Polls the events endpoint of monitored repositories.
pub struct EventPoller<H> {
    client: H,
    credential: Option<Credential>,
    api_base_url: Url,
    timeout: Duration,
}

impl<H: HttpClient> EventPoller<H> {
    /// Creates a poller.
    pub fn new(
        client: H,
        credential: Option<Credential>,
        api_base_url: Url,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            credential,
            api_base_url,
            timeout,
        }
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &H {
        &self.client
    }

    /// Polls `repository` for new events.
    ///
    /// On a successful response the new cache token is stored in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredential`] without issuing a request if
    /// the poller has no credential.
    pub async fn check(
        &self,
        registry: &RepoRegistry,
        repository: &MonitoredRepository,
    ) -> Result<PollResult, ConfigError> {
        let credential = self
            .credential
            .as_ref()
            .ok_or(ConfigError::MissingCredential)?;

        let request = match self.build_request(repository, credential) {
            Ok(request) => request,
            Err(e) => return Ok(PollResult::Failure(e)),
        };

        debug!(repo = %repository.key, url = %request.url, "Polling events");
        let response = match self.client.get(&request).await {
            Ok(response) => response,
            Err(e) => return Ok(PollResult::Failure(e.into())),
        };

        Ok(self.classify(registry, repository, response))
    }

    fn classify(
        &self,
        registry: &RepoRegistry,
        repository: &MonitoredRepository,
        response: HttpResponse,
    ) -> PollResult {
        match response.status {
            304 => PollResult::NoChange,
            200..=299 => {
                let events = match decode_events(&response.body) {
                    Ok(events) => events,
                    Err(e) => return PollResult::Failure(e.into()),
                };

                let token = response.header("etag").unwrap_or_default();
                if let Err(e) = registry.update_token(&repository.key, token) {
                    warn!(error = %e, "Failed to store cache token");
                }

                PollResult::Events(events)
            }
            status => PollResult::Failure(PollFailure::UnexpectedStatus { status }),
        }
    }

    fn build_request(
        &self,
        repository: &MonitoredRepository,
        credential: &Credential,
    ) -> Result<HttpRequest, PollFailure> {
        let url = events_url(&self.api_base_url, repository)?;

        let mut headers = vec![
            ("Accept".to_string(), ACCEPT.to_string()),
            (
                "Authorization".to_string(),
                format!("Bearer {}", credential.expose()),
            ),
        ];
        if !repository.cache_token.is_empty() {
            headers.push(("If-None-Match".to_string(), repository.cache_token.clone()));
        }

        Ok(HttpRequest {
            url: url.to_string(),
            headers,
            timeout: self.timeout,
        })
    }
}

/// Builds `{base}/repos/{owner}/{name}/events`.
fn events_url(base: &Url, repository: &MonitoredRepository) -> Result<Url, url::ParseError> {
    let mut url = base.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join(&format!(
        "repos/{}/{}/events",
        repository.key.owner(),
        repository.key.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepoKey;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct StubClient {
        response: Mutex<Option<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl StubClient {
        fn new(response: Result<HttpResponse, TransportError>) -> Self {
            Self {
                response: Mutex::new(Some(response)),
                requests: Mutex::default(),
            }
        }
    }

    impl HttpClient for StubClient {
        async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(TransportError::Timeout { timeout_secs: 10 }))
        }
    }

    fn response(status: u16, etag: Option<&str>, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: etag
                .map(|etag| vec![("ETag".to_string(), etag.to_string())])
                .unwrap_or_default(),
            body: body.to_string(),
        }
    }

    fn setup(token: &str) -> (RepoRegistry, MonitoredRepository) {
        let registry = RepoRegistry::new();
        let mut repo = MonitoredRepository::new(
            RepoKey::parse("acme/widgets").unwrap(),
            PathBuf::from("/srv/acme/widgets"),
        );
        repo.cache_token = token.to_string();
        registry.replace(vec![repo.clone()], false);
        if !token.is_empty() {
            registry.update_token(&repo.key, token).unwrap();
        }
        (registry, repo)
    }

    fn poller(client: StubClient, credential: Option<&str>) -> EventPoller<StubClient> {
        EventPoller::new(
            client,
            credential.and_then(Credential::new),
            Url::parse("https://api.github.com").unwrap(),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn not_modified_is_no_change_and_keeps_token() {
        let (registry, repo) = setup("\"v1\"");
        let poller = poller(StubClient::new(Ok(response(304, None, ""))), Some("secret"));

        let result = poller.check(&registry, &repo).await.unwrap();

        assert!(matches!(result, PollResult::NoChange));
        assert_eq!(registry.get(&repo.key).unwrap().cache_token, "\"v1\"");

        let requests = poller.client().requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(
            request.url,
            "https://api.github.com/repos/acme/widgets/events"
        );
        assert!(request
            .headers
            .contains(&("If-None-Match".to_string(), "\"v1\"".to_string())));
        assert!(request
            .headers
            .contains(&("Authorization".to_string(), "Bearer secret".to_string())));
        assert_eq!(request.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn success_returns_events_and_stores_new_token() {
        let (registry, repo) = setup("");
        let body = r#"[{"type": "PushEvent", "id": "1"}]"#;
        let poller = poller(
            StubClient::new(Ok(response(200, Some("\"v2\""), body))),
            Some("secret"),
        );

        let result = poller.check(&registry, &repo).await.unwrap();

        let events = match result {
            PollResult::Events(events) => events,
            other => panic!("expected events, got {other:?}"),
        };
        assert_eq!(events.len(), 1);
        assert_eq!(registry.get(&repo.key).unwrap().cache_token, "\"v2\"");

        let requests = poller.client().requests.lock().unwrap();
        assert!(!requests[0]
            .headers
            .iter()
            .any(|(name, _)| name == "If-None-Match"));
    }

    #[tokio::test]
    async fn error_status_is_failure_and_keeps_token() {
        let (registry, repo) = setup("\"v1\"");
        let poller = poller(
            StubClient::new(Ok(response(502, Some("\"v9\""), "bad gateway"))),
            Some("secret"),
        );

        let result = poller.check(&registry, &repo).await.unwrap();

        assert!(matches!(
            result,
            PollResult::Failure(PollFailure::UnexpectedStatus { status: 502 })
        ));
        assert_eq!(registry.get(&repo.key).unwrap().cache_token, "\"v1\"");
    }

    #[tokio::test]
    async fn undecodable_body_is_failure_and_keeps_token() {
        let (registry, repo) = setup("\"v1\"");
        let poller = poller(
            StubClient::new(Ok(response(200, Some("\"v2\""), "<html>"))),
            Some("secret"),
        );

        let result = poller.check(&registry, &repo).await.unwrap();

        assert!(matches!(result, PollResult::Failure(PollFailure::Decode(_))));
        assert_eq!(registry.get(&repo.key).unwrap().cache_token, "\"v1\"");
    }

    #[tokio::test]
    async fn transport_error_is_failure() {
        let (registry, repo) = setup("");
        let poller = poller(
            StubClient::new(Err(TransportError::Timeout { timeout_secs: 10 })),
            Some("secret"),
        );

        let result = poller.check(&registry, &repo).await.unwrap();

        assert!(matches!(
            result,
            PollResult::Failure(PollFailure::Transport(TransportError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn missing_credential_never_sends_a_request() {
        let (registry, repo) = setup("");
        let poller = poller(StubClient::new(Ok(response(304, None, ""))), None);

        let result = poller.check(&registry, &repo).await;

        assert!(matches!(result, Err(ConfigError::MissingCredential)));
        assert!(poller.client().requests.lock().unwrap().is_empty());
    }

    #[test]
    fn events_url_respects_base_path() {
        let repo = MonitoredRepository::new(
            RepoKey::parse("acme/widgets").unwrap(),
            PathBuf::from("/srv/acme/widgets"),
        );
        let base = Url::parse("https://github.example.com/api/v3").unwrap();

        assert_eq!(
            events_url(&base, &repo).unwrap().as_str(),
            "https://github.example.com/api/v3/repos/acme/widgets/events"
        );
    }
}
