use std::sync::Arc;
use std::time::Duration;

use race_tunnel_instruments::{Outcome, Reporter};
use race_tunnel_instruments_derive::race_tunnel_instrument;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::CallError;
use crate::types::{
    Credentials, InventoryState, LoginResponse, OrderId, OrderRequest, OrderResponse,
};

/// Connection settings for [InventoryClient].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    /// Sent as a bearer token with every call except register and login.
    pub token: Option<String>,
    /// Upper bound on each call, after which it is abandoned and reported as a timeout.
    pub call_timeout: Duration,
    /// Statuses reported as [Outcome::Conflict] rather than a client error.
    pub conflict_statuses: Vec<u16>,
}

/// HTTP client for the inventory, auth and shop endpoints.
///
/// Every public call except [InventoryClient::snapshot_inventory] is timed and its outcome is
/// reported to the shared [Reporter] under its operation id.
#[derive(Clone)]
pub struct InventoryClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    call_timeout: Duration,
    conflict_statuses: Arc<[u16]>,
    reporter: Arc<Reporter>,
}

impl std::fmt::Debug for InventoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryClient")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.token.is_some())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl InventoryClient {
    pub fn new(options: ClientOptions, reporter: Arc<Reporter>) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(CallError::Transport)?;

        Ok(Self {
            http,
            base_url: Url::parse(&options.base_url)?,
            token: options.token,
            call_timeout: options.call_timeout,
            conflict_statuses: options.conflict_statuses.into(),
            reporter,
        })
    }

    /// A client sharing this one's connection pool but authenticating as someone else.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..self.clone()
        }
    }

    /// `POST /inventories/{sku}/reserve?quantity=N`
    #[race_tunnel_instrument(prefix = "inventory_")]
    pub async fn reserve(&self, sku: &str, quantity: u32) -> Result<(), CallError> {
        let mut url = self.url(&["inventories", sku, "reserve"])?;
        url.query_pairs_mut()
            .append_pair("quantity", &quantity.to_string());

        self.send(self.request(Method::POST, url), self.call_timeout)
            .await
            .map(|_| ())
    }

    /// `GET /inventories/{sku}`
    #[race_tunnel_instrument(prefix = "inventory_", operation = "get")]
    pub async fn get_inventory(&self, sku: &str) -> Result<InventoryState, CallError> {
        self.fetch_inventory(sku, self.call_timeout).await
    }

    /// Read an inventory for verification. Not reported, so it never counts towards the run's
    /// outcomes or latencies.
    pub async fn snapshot_inventory(
        &self,
        sku: &str,
        timeout: Duration,
    ) -> Result<InventoryState, CallError> {
        self.fetch_inventory(sku, timeout).await
    }

    /// `POST /auth/register`
    #[race_tunnel_instrument(prefix = "auth_")]
    pub async fn register(&self, credentials: &Credentials) -> Result<(), CallError> {
        let url = self.url(&["auth", "register"])?;
        let request = self.http.post(url).json(credentials);

        self.send(request, self.call_timeout).await.map(|_| ())
    }

    /// `POST /auth/login`, returning the session token.
    #[race_tunnel_instrument(prefix = "auth_")]
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, CallError> {
        let url = self.url(&["auth", "login"])?;
        let request = self.http.post(url).json(credentials);

        let body = self.send(request, self.call_timeout).await?;
        parse_body(&body)
    }

    /// `GET /products`. The listing is returned as raw JSON since only its availability matters.
    #[race_tunnel_instrument(prefix = "shop_")]
    pub async fn list_products(&self) -> Result<serde_json::Value, CallError> {
        let url = self.url(&["products"])?;

        let body = self.send(self.request(Method::GET, url), self.call_timeout).await?;
        parse_body(&body)
    }

    /// `POST /api/orders`
    #[race_tunnel_instrument(prefix = "shop_")]
    pub async fn create_order(&self, order: &OrderRequest) -> Result<OrderResponse, CallError> {
        let url = self.url(&["api", "orders"])?;
        let request = self.request(Method::POST, url).json(order);

        let body = self.send(request, self.call_timeout).await?;
        parse_body(&body)
    }

    /// `GET /api/orders/{id}`
    #[race_tunnel_instrument(prefix = "shop_")]
    pub async fn get_order(&self, id: &OrderId) -> Result<OrderResponse, CallError> {
        let id = id.to_string();
        let url = self.url(&["api", "orders", &id])?;

        let body = self.send(self.request(Method::GET, url), self.call_timeout).await?;
        parse_body(&body)
    }

    async fn fetch_inventory(
        &self,
        sku: &str,
        timeout: Duration,
    ) -> Result<InventoryState, CallError> {
        let url = self.url(&["inventories", sku])?;

        let body = self.send(self.request(Method::GET, url), timeout).await?;
        parse_body(&body)
    }

    /// Append path segments to the base URL, keeping any path prefix it already has.
    fn url(&self, segments: &[&str]) -> Result<Url, CallError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and return the body of a 2xx response. Dropping the in-flight request on
    /// timeout aborts it.
    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<String, CallError> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(CallError::Timeout(timeout)),
            Ok(Err(e)) => return Err(CallError::Transport(e)),
            Err(_) => return Err(CallError::Timeout(timeout)),
        };

        match Outcome::from_status(status, &self.conflict_statuses) {
            Outcome::Success => Ok(body),
            outcome => Err(CallError::rejected(status, outcome, &body)),
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, CallError> {
    serde_json::from_str(body).map_err(|e| {
        log::warn!("Could not parse response body: {e}. Body: {body}");
        CallError::parse(body, e)
    })
}
