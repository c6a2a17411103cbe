//! Shared HTTP client and the header strategies used against hot-link protected origins.

use std::sync::Arc;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, HeaderMap, HeaderName, HeaderValue,
    ORIGIN, PRAGMA, REFERER, USER_AGENT,
};
use reqwest::{Client, Proxy, RequestBuilder};
use tracing::debug;
use url::Url;

use crate::{ClientConfig, DownloadError};

const SEC_FETCH_DEST: HeaderName = HeaderName::from_static("sec-fetch-dest");
const SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");
const SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");

/// Header set sent with a request.
///
/// Origins that reject the full browser profile with `403` are retried down the
/// [`HeaderProfile::LADDER`] before the request is given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Browser-like headers with Referer/Origin pointing at the URL's own origin.
    Browser,
    /// Only a user agent and `Accept: */*`.
    Minimal,
    /// Referer synthesized from the URL's parent directory.
    ParentReferer,
}

impl HeaderProfile {
    pub const LADDER: [HeaderProfile; 3] = [Self::Browser, Self::Minimal, Self::ParentReferer];

    pub fn headers(self, url: &Url, user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let origin = origin_of(url);
        match self {
            Self::Minimal => {}
            Self::Browser => {
                headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
                headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
                insert_str(&mut headers, REFERER, &format!("{origin}/"));
                insert_str(&mut headers, ORIGIN, &origin);
                headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("empty"));
                headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("cors"));
                headers.insert(SEC_FETCH_SITE, HeaderValue::from_static("same-origin"));
                headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            }
            Self::ParentReferer => {
                insert_str(&mut headers, REFERER, &parent_referer(url));
                insert_str(&mut headers, ORIGIN, &origin);
            }
        }
        headers
    }
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// `scheme://host[:port]` of `url`.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Referer pointing at the directory that contains `url`'s last path segment.
///
/// Servers commonly validate the Referer against the resource's own directory tree.
/// Resources that sit directly under the root get the origin root.
pub fn parent_referer(url: &Url) -> String {
    let origin = origin_of(url);
    let path = url.path();
    match path.rfind('/') {
        Some(idx) if idx > 0 => format!("{origin}{}/", &path[..idx]),
        _ => format!("{origin}/"),
    }
}

/// Explicitly constructed HTTP client, immutable once built and cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: Arc<str>,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .default_headers(config.headers.clone());

        if let Some(proxy_url) = config.proxy.as_deref() {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                DownloadError::configuration(format!("invalid proxy URL `{proxy_url}`: {e}"))
            })?;
            debug!(proxy = %proxy_url, "Using explicit proxy");
            builder = builder.proxy(proxy);
        } else if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            inner: builder.build()?,
            user_agent: Arc::from(config.user_agent.as_str()),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn get(&self, url: &Url, profile: HeaderProfile) -> RequestBuilder {
        self.inner
            .get(url.clone())
            .headers(profile.headers(url, &self.user_agent))
    }

    pub fn head(&self, url: &Url, profile: HeaderProfile) -> RequestBuilder {
        self.inner
            .head(url.clone())
            .headers(profile.headers(url, &self.user_agent))
    }
}
