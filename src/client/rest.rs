//! HTTP REST client for venue snapshot endpoints.
//!
//! Venue adapters use [`RestClient`] to fetch order book snapshots. Only
//! public, unsigned GET requests are made; request signing is not needed for
//! market data.
//!
//! # Example
//!
//! ```rust,no_run
//! use exchange_feed::client::rest::RestClient;
//! use exchange_feed::config::{Config, MarketType, Venue};
//!
//! # async fn example() -> exchange_feed::Result<()> {
//! let rest = RestClient::new(&Config::new(Venue::Binance, MarketType::Spot))?;
//! let depth: serde_json::Value = rest
//!     .get("/api/v3/depth", &[("symbol", "BTCUSDT"), ("limit", "100")])
//!     .await?;
//! # Ok(())
//! # }
//! ```

use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Client;
use tracing::debug;

use crate::config::{Config, TlsMode};
use crate::error::{ApiError, Error};

/// HTTP client for a venue's REST API
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// Honors the configured timeout, proxy and TLS verification mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the HTTP client cannot
    /// be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.tls_mode() == TlsMode::Insecure);
        if let Some(proxy) = config.proxy_url() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.rest_base_url().trim_end_matches('/').to_string(),
        })
    }

    /// Make a GET request to the API
    ///
    /// # Arguments
    ///
    /// * `path` - API path (without base URL)
    /// * `query` - Query string parameters
    ///
    /// # Returns
    ///
    /// Deserialized response body
    pub async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, ?query, "GET");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .query(query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response<T>(&self, response: reqwest::Response) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status().as_u16();

        // 418 is Binance's "banned for ignoring 429s"
        if status == 429 || status == 418 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(retry_after_ms);

            return Err(Error::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(Error::Api(parse_api_error(status, &body)));
        }
        serde_json::from_str(&body).map_err(Error::from)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// `Retry-After` is given in seconds
fn retry_after_ms(header: &str) -> Option<u64> {
    header.trim().parse::<u64>().ok().map(|secs| secs * 1000)
}

/// Build an [`ApiError`] from an error body
///
/// Venues disagree on field names: Binance sends `{"code": -1121, "msg": ..}`,
/// Gate sends `{"label": "..", "message": ..}`.
fn parse_api_error(status: u16, body: &str) -> ApiError {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return ApiError::new(status, body);
    };

    let message = ["message", "msg", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .unwrap_or(body)
        .to_string();

    let code = value
        .get("code")
        .or_else(|| value.get("label"))
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    ApiError {
        status,
        code,
        message,
    }
}
