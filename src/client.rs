// Flight data API client: transport, configuration and typed queries

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::try_join;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    analysis::{self, CompetitionReport, NetworkSummary},
    cache::{CacheConfig, CacheStats, RequestParams, ResultCache, CREDENTIAL_FIELD},
    error::{classify, ApiError, AttemptOutcome, ClientError},
    gateway::CachedGateway,
    models::{parse_routes, Endpoint, Route},
    retry::RetryConfig,
    routes::{self, ConnectionCandidate, ConnectionOptions},
};

pub const DEFAULT_BASE_URL: &str = "http://api.aviationstack.com/v1";

#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub access_key: String,
    pub timeout_ms: u64,
    pub retry_config: RetryConfig,
    pub cache_config: CacheConfig,
    pub coalesce_requests: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_key: String::new(),
            timeout_ms: 10_000,
            retry_config: RetryConfig::default(),
            cache_config: CacheConfig::default(),
            coalesce_requests: false,
        }
    }
}

// The access key must never end up in logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("access_key", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_config", &self.retry_config)
            .field("cache_config", &self.cache_config)
            .field("coalesce_requests", &self.coalesce_requests)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(access_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.access_key.trim().is_empty() {
            return Err(ClientError::ConfigError("access key is required".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "base url must be http(s), got {:?}",
                self.base_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError("timeout must be positive".to_string()));
        }
        if self.cache_config.enabled {
            if self.cache_config.max_entries == 0 {
                return Err(ClientError::ConfigError(
                    "cache max entries must be positive".to_string(),
                ));
            }
            if self.cache_config.ttl_seconds == 0 {
                return Err(ClientError::ConfigError("cache ttl must be positive".to_string()));
            }
            if self.cache_config.cleanup_interval_seconds == Some(0) {
                return Err(ClientError::ConfigError(
                    "cleanup interval must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One GET against the upstream API. Implementations report the raw outcome
/// and leave classification to the caller.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, path: &str, query: &[(String, String)]) -> AttemptOutcome;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn no_response(err: reqwest::Error) -> AttemptOutcome {
    let timed_out = err.is_timeout();
    // The URL carries the access key in its query string
    AttemptOutcome::NoResponse {
        reason: err.without_url().to_string(),
        timed_out,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(String, String)]) -> AttemptOutcome {
        let url = format!("{}/{}", self.base_url, path);

        let response = match self.client.get(&url).query(query).send().await {
            Ok(response) => response,
            Err(err) => return no_response(err),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => AttemptOutcome::Response { status, body },
            Err(err) => no_response(err),
        }
    }
}

/// Extracts the record list from `{ success, data: [...] }` or a bare array.
pub fn unwrap_records(payload: Value) -> Result<Vec<Value>, ApiError> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None if map.get("success") == Some(&Value::Bool(true)) => {
                Ok(Vec::new())
            }
            _ => Err(ApiError::InvalidResponse(
                "expected a data array in response envelope".to_string(),
            )),
        },
        other => Err(ApiError::InvalidResponse(format!(
            "expected array or envelope, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteQuery {
    pub dep_iata: Option<String>,
    pub arr_iata: Option<String>,
    pub airline_iata: Option<String>,
    pub flight_number: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl RouteQuery {
    pub fn between(origin: &str, destination: &str) -> Self {
        Self {
            dep_iata: Some(origin.to_ascii_uppercase()),
            arr_iata: Some(destination.to_ascii_uppercase()),
            ..Default::default()
        }
    }

    pub fn departing(origin: &str) -> Self {
        Self {
            dep_iata: Some(origin.to_ascii_uppercase()),
            ..Default::default()
        }
    }

    pub fn arriving(destination: &str) -> Self {
        Self {
            arr_iata: Some(destination.to_ascii_uppercase()),
            ..Default::default()
        }
    }

    pub fn airline(airline: &str) -> Self {
        Self {
            airline_iata: Some(airline.to_ascii_uppercase()),
            ..Default::default()
        }
    }

    pub fn to_params(&self) -> RequestParams {
        let mut params = RequestParams::new(Endpoint::Routes);
        let fields = [
            ("dep_iata", self.dep_iata.clone()),
            ("arr_iata", self.arr_iata.clone()),
            ("airline_iata", self.airline_iata.clone()),
            ("flight_number", self.flight_number.clone()),
            ("limit", self.limit.map(|v| v.to_string())),
            ("offset", self.offset.map(|v| v.to_string())),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                params = params.with(key, value);
            }
        }
        params
    }
}

pub struct FlightDataClient<T = HttpTransport> {
    transport: Arc<T>,
    gateway: CachedGateway,
    config: ClientConfig,
}

impl FlightDataClient<HttpTransport> {
    // Create a new client backed by reqwest
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport =
            HttpTransport::new(&config.base_url, Duration::from_millis(config.timeout_ms))?;
        Self::with_transport(config, transport).await
    }
}

impl<T: Transport> FlightDataClient<T> {
    pub async fn with_transport(config: ClientConfig, transport: T) -> Result<Self, ClientError> {
        config.validate()?;

        let cache = if config.cache_config.enabled {
            let cache = Arc::new(ResultCache::from_config(&config.cache_config));
            if let Some(secs) = config.cache_config.cleanup_interval_seconds {
                cache.spawn_cleanup(Duration::from_secs(secs));
            }
            Some(cache)
        } else {
            None
        };

        let gateway = CachedGateway::new(cache, config.retry_config.clone())
            .with_coalescing(config.coalesce_requests);

        info!(
            base_url = %config.base_url,
            cache_enabled = config.cache_config.enabled,
            cache_ttl_seconds = config.cache_config.ttl_seconds,
            cache_max_entries = config.cache_config.max_entries,
            max_retries = config.retry_config.max_retries,
            "flight data client initialized"
        );

        Ok(Self {
            transport: Arc::new(transport),
            gateway,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Raw payload for one endpoint call, served from cache when possible.
    pub async fn fetch(&self, params: &RequestParams) -> Result<Value, ApiError> {
        let path = params.endpoint.path();
        let mut query = params.query();
        query.push((CREDENTIAL_FIELD.to_string(), self.config.access_key.clone()));

        let transport = &self.transport;
        let query = &query;

        debug!(endpoint = path, params = ?params.query(), "fetching");

        self.gateway
            .fetch(params, || async move {
                let outcome = transport.get(path, query).await;
                classify(&outcome).into_result()
            })
            .await
    }

    /// Records of one endpoint call with the response envelope removed.
    pub async fn list(&self, params: &RequestParams) -> Result<Vec<Value>, ApiError> {
        let payload = self.fetch(params).await?;
        unwrap_records(payload)
    }

    pub async fn routes(&self, query: &RouteQuery) -> Result<Vec<Route>, ApiError> {
        let records = self.list(&query.to_params()).await?;
        let routes = parse_routes(&records);
        debug!(records = records.len(), routes = routes.len(), "parsed routes");
        Ok(routes)
    }

    /// One-stop itineraries between two airports, using routes out of the
    /// origin and routes into the destination fetched concurrently.
    pub async fn find_connections(
        &self,
        origin: &str,
        destination: &str,
        options: &ConnectionOptions,
    ) -> Result<Vec<ConnectionCandidate>, ApiError> {
        let outbound_query = RouteQuery::departing(origin);
        let inbound_query = RouteQuery::arriving(destination);

        let (mut routes, inbound) =
            try_join(self.routes(&outbound_query), self.routes(&inbound_query)).await?;
        routes.extend(inbound);

        let origin = origin.to_ascii_uppercase();
        let destination = destination.to_ascii_uppercase();
        let found = routes::find_connections(&routes, &origin, &destination, options);

        debug!(
            origin = %origin,
            destination = %destination,
            candidates = found.len(),
            "connection search finished"
        );
        Ok(found)
    }

    pub async fn route_competition(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<CompetitionReport, ApiError> {
        let routes = self.routes(&RouteQuery::between(origin, destination)).await?;
        Ok(analysis::competition(&routes))
    }

    pub async fn airline_network(&self, airline: &str) -> Result<NetworkSummary, ApiError> {
        let routes = self.routes(&RouteQuery::airline(airline)).await?;
        Ok(analysis::network_summary(airline, &routes))
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.gateway.cache().map(|cache| cache.stats())
    }

    pub fn invalidate(&self, params: &RequestParams) -> bool {
        self.gateway
            .cache()
            .map_or(false, |cache| cache.invalidate(params))
    }

    /// Clears the cache and stops the periodic cleanup task.
    pub fn destroy(&self) {
        if let Some(cache) = self.gateway.cache() {
            cache.destroy();
        }
        info!("flight data client destroyed");
    }
}



#[cfg(test)]
mod http_tests {
    use super::*;
    use crate::error::ErrorKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> FlightDataClient {
        let config = ClientConfig {
            base_url: server.uri(),
            retry_config: RetryConfig {
                max_retries: 2,
                delay_ms: 5,
            },
            ..ClientConfig::new("wire-key")
        };
        FlightDataClient::new(config).await.expect("http client")
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let missing_key = FlightDataClient::new(ClientConfig::default()).await;
        assert!(matches!(missing_key, Err(ClientError::ConfigError(_))));

        let bad_url = ClientConfig {
            base_url: "ftp://example.test".to_string(),
            ..ClientConfig::new("wire-key")
        };
        assert!(matches!(
            FlightDataClient::new(bad_url).await,
            Err(ClientError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_success_with_credential_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/airports"))
            .and(query_param("access_key", "wire-key"))
            .and(query_param("search", "heathrow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success":true,"data":[{"iata_code":"LHR"}]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let params = RequestParams::new(Endpoint::Airports).with("search", "heathrow");

        let records = client.list(&params).await.expect("records");
        assert_eq!(records.len(), 1);

        // served from cache, the mock expects exactly one call
        client.list(&params).await.expect("cached records");
    }

    #[tokio::test]
    async fn test_client_error_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .fetch(&RequestParams::new(Endpoint::Flights))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ClientError);
    }

    #[tokio::test]
    async fn test_server_error_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .fetch(&RequestParams::new(Endpoint::Flights))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServerError);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_application_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":{"code":"usage_limit_reached","type":"usage_limit_reached","info":"Your monthly usage limit has been reached."}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .fetch(&RequestParams::new(Endpoint::Routes))
            .await
            .unwrap_err();

        match err {
            ApiError::UpstreamApplicationError { code, .. } => {
                assert_eq!(code, "usage_limit_reached")
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig {
            base_url: format!("http://{}", addr),
            retry_config: RetryConfig {
                max_retries: 1,
                delay_ms: 1,
            },
            ..ClientConfig::new("wire-key")
        };
        let client = FlightDataClient::new(config).await.unwrap();

        let err = client
            .fetch(&RequestParams::new(Endpoint::Flights))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!err.to_string().contains("wire-key"));
    }
}
