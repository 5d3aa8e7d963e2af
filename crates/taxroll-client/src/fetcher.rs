use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HOST, REFERER};
use reqwest::{Client, Response};
use taxroll_core::error::AppError;
use taxroll_core::models::{Identity, SessionCookies};
use taxroll_core::traits::PortalFetcher;
use url::Url;

pub const DEFAULT_WARM_UP_URL: &str = "https://propaccess.trueautomation.com/clientdb/?cid=56";
pub const DEFAULT_REFERER: &str =
    "https://propaccess.trueautomation.com/clientdb/SearchResults.aspx?cid=56";
const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Where and how to talk to the appraisal portal.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Landing page that issues the session cookie.
    pub warm_up_url: String,
    /// `Referer` sent with detail requests.
    pub referer: String,
    pub accept: String,
    pub accept_language: String,
    /// Per-request timeout (connect + headers + body).
    pub timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            warm_up_url: DEFAULT_WARM_UP_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl PortalConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_warm_up_url(mut self, url: impl Into<String>) -> Self {
        self.warm_up_url = url.into();
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }
}

/// Portal client built on reqwest.
///
/// Every request gets its own `Client`, routed through the job's proxy and
/// backed by a fresh cookie jar, so sessions never leak between jobs.
/// Response decompression (gzip, deflate, br) and the matching
/// `Accept-Encoding` header come from reqwest's compression features.
#[derive(Clone)]
pub struct ReqwestPortalFetcher {
    config: Arc<PortalConfig>,
}

impl ReqwestPortalFetcher {
    pub fn new(config: PortalConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn client(&self, identity: &Identity, jar: Arc<Jar>) -> Result<Client, AppError> {
        let mut builder = Client::builder()
            .user_agent(identity.user_agent.as_str())
            .timeout(self.config.timeout)
            .cookie_provider(jar);

        builder = match &identity.proxy {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy.url()).map_err(|e| {
                    AppError::NetworkError(format!("Invalid proxy '{}': {e}", proxy.ip))
                })?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| AppError::Generic(format!("Failed to build HTTP client: {e}")))
    }

    fn map_send_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.config.timeout.as_secs())
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::NetworkError(e.to_string())
        }
    }
}

impl Default for ReqwestPortalFetcher {
    fn default() -> Self {
        Self::new(PortalConfig::default())
    }
}

fn parse_url(url: &str) -> Result<Url, AppError> {
    Url::parse(url).map_err(|e| AppError::MalformedInput(format!("invalid URL '{url}': {e}")))
}

fn ensure_success(response: Response, url: &str) -> Result<Response, AppError> {
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::NetworkError(format!(
            "HTTP {} for {}",
            status.as_u16(),
            url
        )));
    }
    Ok(response)
}

/// `host[:port]` for the `Host` header.
fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

impl PortalFetcher for ReqwestPortalFetcher {
    async fn warm_up(&self, identity: &Identity) -> Result<SessionCookies, AppError> {
        let url = parse_url(&self.config.warm_up_url)?;
        let jar = Arc::new(Jar::default());
        let client = self.client(identity, jar.clone())?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = ensure_success(response, url.as_str())?;
        // Drain the body so the connection completes cleanly.
        response
            .bytes()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read warm-up body: {e}")))?;

        let cookies = jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(SessionCookies::from_header))
            .unwrap_or_default();

        tracing::debug!(
            proxy = ?identity.proxy.as_ref().map(|p| &p.ip),
            cookies = cookies.0.len(),
            "Session warmed up"
        );
        Ok(cookies)
    }

    async fn fetch_detail(
        &self,
        url: &str,
        identity: &Identity,
        cookies: &SessionCookies,
    ) -> Result<Vec<u8>, AppError> {
        let parsed = parse_url(url)?;
        let jar = Arc::new(Jar::default());
        for pair in &cookies.0 {
            jar.add_cookie_str(pair, &parsed);
        }
        let client = self.client(identity, jar)?;

        let mut request = client
            .get(parsed.clone())
            .header(ACCEPT, self.config.accept.as_str())
            .header(ACCEPT_LANGUAGE, self.config.accept_language.as_str())
            .header(REFERER, self.config.referer.as_str());
        if let Some(host) = host_header(&parsed) {
            request = request.header(HOST, host);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let response = ensure_success(response, url)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use taxroll_core::models::Proxy;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve one canned HTTP response per connection and record the raw requests.
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf).to_lowercase());
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{addr}"), requests)
    }

    fn identity() -> Identity {
        Identity {
            proxy: None,
            user_agent: "TestAgent/1.0".into(),
        }
    }

    const OK_WITH_COOKIE: &str = "HTTP/1.1 200 OK\r\nSet-Cookie: ASP.NET_SessionId=abc123; path=/\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
    const OK_DETAIL: &str =
        "HTTP/1.1 200 OK\r\nContent-Length: 13\r\nConnection: close\r\n\r\n<html></html>";
    const FORBIDDEN: &str =
        "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    #[test]
    fn test_default_config_targets_portal() {
        let config = PortalConfig::default();
        assert_eq!(config.warm_up_url, DEFAULT_WARM_UP_URL);
        assert_eq!(config.referer, DEFAULT_REFERER);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_host_header_keeps_port() {
        let url = Url::parse("http://127.0.0.1:8080/p?prop_id=1").unwrap();
        assert_eq!(host_header(&url).as_deref(), Some("127.0.0.1:8080"));
        let url = Url::parse("https://propaccess.trueautomation.com/clientdb/").unwrap();
        assert_eq!(
            host_header(&url).as_deref(),
            Some("propaccess.trueautomation.com")
        );
    }

    #[tokio::test]
    async fn test_warm_up_captures_session_cookie() {
        let (base, requests) = serve(vec![OK_WITH_COOKIE]).await;
        let fetcher = ReqwestPortalFetcher::new(
            PortalConfig::default().with_warm_up_url(format!("{base}/clientdb/?cid=56")),
        );

        let cookies = fetcher.warm_up(&identity()).await.unwrap();

        assert_eq!(cookies.0, vec!["ASP.NET_SessionId=abc123".to_string()]);
        let requests = requests.lock().unwrap();
        assert!(requests[0].starts_with("get /clientdb/?cid=56"));
        assert!(requests[0].contains("user-agent: testagent/1.0"));
    }

    #[tokio::test]
    async fn test_warm_up_non_success_is_network_error() {
        let (base, _) = serve(vec![FORBIDDEN]).await;
        let fetcher = ReqwestPortalFetcher::new(PortalConfig::default().with_warm_up_url(base));

        let err = fetcher.warm_up(&identity()).await.unwrap_err();
        assert!(matches!(err, AppError::NetworkError(ref msg) if msg.contains("403")));
    }

    #[tokio::test]
    async fn test_fetch_detail_replays_cookies_and_headers() {
        let (base, requests) = serve(vec![OK_DETAIL]).await;
        let fetcher = ReqwestPortalFetcher::default();
        let url = format!("{base}/clientdb/Property.aspx?cid=56&prop_id=42");
        let cookies = SessionCookies(vec!["ASP.NET_SessionId=abc123".into()]);

        let body = fetcher
            .fetch_detail(&url, &identity(), &cookies)
            .await
            .unwrap();

        assert_eq!(body, b"<html></html>".to_vec());
        let requests = requests.lock().unwrap();
        let request = &requests[0];
        assert!(request.contains("cookie: asp.net_sessionid=abc123"));
        assert!(request.contains("referer: https://propaccess.trueautomation.com/clientdb/searchresults.aspx?cid=56"));
        assert!(request.contains("accept-language: en-us"));
        assert!(request.contains("accept-encoding: "));
        assert!(request.contains("gzip"));
        assert!(request.contains("user-agent: testagent/1.0"));
    }

    #[tokio::test]
    async fn test_fetch_detail_sends_configured_referer() {
        let (base, requests) = serve(vec![OK_DETAIL]).await;
        let fetcher = ReqwestPortalFetcher::new(
            PortalConfig::default().with_referer(format!("{base}/clientdb/SearchResults.aspx")),
        );
        let url = format!("{base}/clientdb/Property.aspx?cid=56&prop_id=42");

        fetcher
            .fetch_detail(&url, &identity(), &SessionCookies::default())
            .await
            .unwrap();

        let requests = requests.lock().unwrap();
        assert!(requests[0].contains(&format!(
            "referer: {}/clientdb/searchresults.aspx",
            base.to_lowercase()
        )));
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_network_failure() {
        let fetcher = ReqwestPortalFetcher::new(
            PortalConfig::default()
                .with_warm_up_url("http://127.0.0.1:9/")
                .with_timeout(Duration::from_secs(5)),
        );
        let identity = Identity {
            proxy: Some(Proxy::new("127.0.0.1:1")),
            user_agent: "TestAgent/1.0".into(),
        };

        let err = fetcher.warm_up(&identity).await.unwrap_err();
        assert!(err.is_network(), "unexpected error: {err:?}");
    }
}
