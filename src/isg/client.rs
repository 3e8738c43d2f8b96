use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

use crate::config::GatewayConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::model::PendingCommand;

/// HTTP client for the ISG's embedded web interface.
///
/// The device speaks a single cookie-authenticated session: every page
/// is fetched with a POST carrying the credentials, and the shared
/// cookie jar keeps the session alive across requests. One client per
/// bridge instance — the design assumes one logical client identity.
pub struct IsgClient {
    base: Url,
    user: String,
    pass: String,
    timeout: Option<Duration>,
    http: reqwest::Client,
}

impl IsgClient {
    pub fn new(config: &GatewayConfig, timeout: Option<Duration>) -> BridgeResult<Self> {
        let base = Url::parse(config.host.trim())
            .map_err(|err| BridgeError::ConfigInvalid(format!("gateway host: {err}")))?;
        if base.host_str().is_none() {
            return Err(BridgeError::ConfigInvalid(format!(
                "gateway host {:?} has no host part",
                config.host
            )));
        }

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(BridgeError::Transport)?;

        Ok(Self {
            base,
            user: config.user.clone(),
            pass: config.pass.clone(),
            timeout,
            http,
        })
    }

    fn page_url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path("/");
        url.set_query(Some(&format!("s={path}")));
        url
    }

    /// Fetch one page of the web interface.
    ///
    /// Returns the raw HTML body on HTTP 200. The caller parses it with
    /// `scraper::Html` in a synchronous scope; the parsed document is
    /// deliberately not returned across this async boundary since it is
    /// not `Send`.
    pub async fn fetch_page(&self, path: &str) -> BridgeResult<String> {
        let url = self.page_url(path);
        let mut request = self
            .http
            .post(url)
            .form(&[("user", self.user.as_str()), ("pass", self.pass.as_str())]);
        if let Some(timeout) = self.timeout {
            // reqwest cancels the in-flight call when the deadline
            // expires, and drops the timer on every exit path.
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(BridgeError::from_request)?;
        if response.status() != StatusCode::OK {
            return Err(BridgeError::HttpStatus(response.status()));
        }
        Ok(response.text().await.map_err(BridgeError::from_request)?)
    }

    /// Submit a batch of setpoint writes as one `save.php` form post.
    pub async fn submit_commands(&self, batch: &[PendingCommand]) -> BridgeResult<()> {
        let mut url = self.base.clone();
        url.set_path("/save.php");

        let data = serde_json::to_string(batch)?;
        let mut request = self.http.post(url).form(&[
            ("user", self.user.as_str()),
            ("pass", self.pass.as_str()),
            ("data", data.as_str()),
        ]);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(BridgeError::from_request)?;
        if response.status() != StatusCode::OK {
            return Err(BridgeError::HttpStatus(response.status()));
        }
        Ok(())
    }

    /// Request a device reboot.
    pub async fn reboot(&self) -> BridgeResult<()> {
        let mut url = self.base.clone();
        url.set_path("/reboot.php");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(BridgeError::from_request)?;
        if response.status() != StatusCode::OK {
            return Err(BridgeError::HttpStatus(response.status()));
        }
        Ok(())
    }
}

/// Outbound command submission seam, so the batcher can be exercised
/// without a device on the network.
#[async_trait::async_trait]
pub trait CommandSink: Send + Sync {
    async fn submit(&self, batch: &[PendingCommand]) -> BridgeResult<()>;
}

#[async_trait::async_trait]
impl CommandSink for IsgClient {
    async fn submit(&self, batch: &[PendingCommand]) -> BridgeResult<()> {
        self.submit_commands(batch).await
    }
}
