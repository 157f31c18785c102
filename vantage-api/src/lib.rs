//! Client for the Vantage endpoint control plane HTTP API.
//!
//! Wraps the handful of endpoints the admin console talks to: the feature
//! configuration mirror, the toggle writer, administrator login, and the
//! VPN approval queue. Callers get typed responses; body-level failures
//! (`success: false` with a reason) are surfaced as [`Error::Rejected`] so
//! the caller never has to inspect raw JSON.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, IntoUrl, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("API error with reqwest: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("HTTP error from API: {0}")]
    HttpError(StatusCode),
    /// The control plane answered but refused the request, carrying a
    /// human-readable reason in the response body.
    #[error("{0}")]
    Rejected(String),
}

/// Generic `{success, message}` envelope used by write endpoints.
#[derive(Deserialize, Debug)]
struct StatusResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PendingRequestsResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    requests: Vec<PendingRequest>,
}

/// One entry in the VPN approval queue, as the control plane reports it.
/// The timestamp is passed through as the raw string the server sent.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AdminUser {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<AdminUser>,
}

#[derive(Deserialize, Debug)]
pub struct SystemInfo {
    pub system_id: String,
}

#[derive(Serialize)]
struct ToggleBody<'a> {
    features: &'a BTreeMap<String, bool>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ResolveBody<'a> {
    request_id: &'a str,
}

#[derive(Deserialize)]
struct ActivationResponse {
    #[serde(default)]
    activation_key: Option<String>,
}

/// The two site lists the browsing restrictions consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteList {
    Whitelist,
    Blocklist,
}

impl SiteList {
    fn path(self) -> &'static str {
        match self {
            SiteList::Whitelist => "whitelist",
            SiteList::Blocklist => "blocklist",
        }
    }
}

impl std::fmt::Display for SiteList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Deserialize)]
struct WhitelistResponse {
    whitelist: Vec<String>,
}

#[derive(Deserialize)]
struct BlocklistResponse {
    blocklist: Vec<String>,
}

#[derive(Serialize)]
struct SiteBody<'a> {
    site: &'a str,
}

pub struct ConsoleApi {
    client: Client,
    base_url: Url,
}

impl ConsoleApi {
    pub fn new<T: IntoUrl>(base_url: T, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let mut base_url = base_url.into_url()?;
        // Url::join treats a base without a trailing slash as a file and
        // would drop the last path segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Url {
        self.base_url.join(path).unwrap()
    }

    /// Fetch the authoritative feature map, `{name: enabled}`.
    pub async fn get_config(&self) -> Result<BTreeMap<String, bool>> {
        let response = self.client.get(self.endpoint("config")).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpError(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Push a batch of feature toggles. All entries are applied by the
    /// control plane as one request; a `success: false` reply becomes
    /// [`Error::Rejected`] with the server-supplied reason.
    pub async fn apply_toggles(&self, features: &BTreeMap<String, bool>) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("toggle"))
            .json(&ToggleBody { features })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(status));
        }
        let body: StatusResponse = response.json().await?;
        if body.success {
            Ok(())
        } else {
            Err(Error::Rejected(
                body.message
                    .unwrap_or_else(|| "toggle rejected by the control plane".to_string()),
            ))
        }
    }

    /// Authenticate an administrator and obtain a bearer token for the
    /// approval endpoints. A 4xx reply carries the server's rejection
    /// message verbatim.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let response = self
            .client
            .post(self.endpoint("auth/login"))
            .json(&LoginBody { username, password })
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        if status.is_client_error() {
            let body: std::result::Result<StatusResponse, _> = response.json().await;
            let message = body
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("login failed (HTTP {status})"));
            return Err(Error::Rejected(message));
        }
        Err(Error::HttpError(status))
    }

    /// List VPN enablement requests awaiting an administrator decision.
    pub async fn pending_vpn_requests(&self) -> Result<Vec<PendingRequest>> {
        let response = self
            .client
            .get(self.endpoint("vpn/admin-requests"))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(status));
        }
        let body: PendingRequestsResponse = response.json().await?;
        if body.success {
            debug!(count = body.requests.len(), "fetched pending VPN requests");
            Ok(body.requests)
        } else {
            Err(Error::Rejected(
                body.message
                    .unwrap_or_else(|| "pending request listing rejected".to_string()),
            ))
        }
    }

    pub async fn approve_vpn_request(&self, token: &str, request_id: &str) -> Result<()> {
        self.resolve("vpn/admin-approve", token, request_id).await
    }

    pub async fn deny_vpn_request(&self, token: &str, request_id: &str) -> Result<()> {
        self.resolve("vpn/admin-deny", token, request_id).await
    }

    async fn resolve(&self, path: &str, token: &str, request_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(token)
            .json(&ResolveBody { request_id })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(status));
        }
        let body: StatusResponse = response.json().await?;
        if body.success {
            Ok(())
        } else {
            Err(Error::Rejected(body.message.unwrap_or_else(|| {
                format!("request {request_id} could not be resolved")
            })))
        }
    }

    pub async fn system_info(&self) -> Result<SystemInfo> {
        let response = self.client.get(self.endpoint("system")).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpError(response.status()));
        }
        Ok(response.json().await?)
    }

    pub async fn activation_key(&self) -> Result<Option<String>> {
        let response = self.client.get(self.endpoint("activation")).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpError(response.status()));
        }
        let body: ActivationResponse = response.json().await?;
        Ok(body.activation_key)
    }

    /// Fetch one of the site lists backing the browsing restrictions.
    pub async fn sites(&self, list: SiteList) -> Result<Vec<String>> {
        let response = self.client.get(self.endpoint(list.path())).send().await?;
        self.parse_sites(list, response).await
    }

    /// Add a site to a list, returning the updated list.
    pub async fn add_site(&self, list: SiteList, site: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .post(self.endpoint(list.path()))
            .json(&SiteBody { site })
            .send()
            .await?;
        self.parse_sites(list, response).await
    }

    /// Remove a site from a list, returning the updated list.
    pub async fn remove_site(&self, list: SiteList, site: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .delete(self.endpoint(list.path()))
            .json(&SiteBody { site })
            .send()
            .await?;
        self.parse_sites(list, response).await
    }

    async fn parse_sites(&self, list: SiteList, response: reqwest::Response) -> Result<Vec<String>> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(status));
        }
        match list {
            SiteList::Whitelist => {
                let body: WhitelistResponse = response.json().await?;
                Ok(body.whitelist)
            }
            SiteList::Blocklist => {
                let body: BlocklistResponse = response.json().await?;
                Ok(body.blocklist)
            }
        }
    }

    /// Lightweight reachability probe.
    pub async fn ping(&self) -> Result<()> {
        let response = self.client.get(self.endpoint("ping")).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::HttpError(response.status()))
        }
    }
}
