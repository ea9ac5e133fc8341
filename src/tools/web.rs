//! Network tools: `fetch_webpage`, `search_web`, `http_request`.
//!
//! Requests to loopback, private, link-local and unspecified hosts are
//! refused before anything is sent, and again on every redirect hop.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::redirect::{Attempt, Policy};
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ToolContext, ToolHandler, parse_args, truncate_chars};
use crate::agent::tool::{FieldKind, InputSchema};
use crate::error::ToolError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PAGE_CHARS: usize = 8000;
const MAX_RESPONSE_CHARS: usize = 10_000;
const MAX_SEARCH_RESULTS: usize = 5;
const MAX_REDIRECTS: usize = 10;
const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

static SCRIPT_OR_STYLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>").ok());
static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());
static SEARCH_RESULT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"class="result__a"[^>]*href="([^"]+)"[^>]*>([^<]+)"#).ok()
});

/// Parses `url` and refuses schemes other than http(s) and local hosts.
fn checked_url(tool: &str, raw: &str) -> Result<Url, ToolError> {
    let url = Url::parse(raw.trim()).map_err(|e| ToolError::InvalidInput {
        name: tool.to_string(),
        message: format!("{raw}: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ToolError::InvalidInput {
            name: tool.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if is_local_host(&host) {
        return Err(ToolError::BlockedPath {
            path: raw.to_string(),
        });
    }
    Ok(url)
}

fn is_local_host(host: &str) -> bool {
    if host.is_empty() || host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    match host.trim_matches(['[', ']']).parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_internal_v4(ip),
        Ok(IpAddr::V6(ip)) => is_internal_v6(ip),
        Err(_) => false,
    }
}

const fn is_internal_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_link_local()
        || ip.is_private()
        || ip.is_broadcast()
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local, fe80::/10 link-local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

fn redirect_allowed(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
        && !is_local_host(&url.host_str().unwrap_or_default().to_ascii_lowercase())
}

/// Redirect policy for the tools' HTTP client: every hop must pass the
/// same host check as the original URL.
pub(crate) fn redirect_policy() -> Policy {
    Policy::custom(|attempt: Attempt<'_>| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if redirect_allowed(attempt.url()) {
            attempt.follow()
        } else {
            let target = attempt.url().to_string();
            attempt.error(format!("redirect to blocked host: {target}"))
        }
    })
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Reduces an HTML document to its visible text.
fn html_to_text(html: &str) -> String {
    let (Some(blocks), Some(tags), Some(ws)) = (
        SCRIPT_OR_STYLE.as_ref(),
        TAG.as_ref(),
        WHITESPACE.as_ref(),
    ) else {
        return html.to_string();
    };
    let without_blocks = blocks.replace_all(html, " ");
    let without_tags = tags.replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);
    ws.replace_all(&decoded, " ").trim().to_string()
}

/// Extracts `(title, url)` pairs from a DuckDuckGo HTML result page.
fn parse_search_results(html: &str) -> Vec<(String, String)> {
    let Some(re) = SEARCH_RESULT.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(html)
        .take(MAX_SEARCH_RESULTS)
        .map(|cap| {
            (
                decode_entities(cap[2].trim()),
                decode_entities(&cap[1]),
            )
        })
        .collect()
}

fn request_error(tool: &str, timeout: Duration, err: &reqwest::Error) -> ToolError {
    if err.is_redirect() {
        ToolError::BlockedPath {
            path: err.to_string(),
        }
    } else if err.is_timeout() {
        ToolError::Timeout {
            name: tool.to_string(),
            secs: timeout.as_secs(),
        }
    } else {
        ToolError::Execution {
            name: tool.to_string(),
            message: err.to_string(),
        }
    }
}

/// `fetch_webpage`: downloads a page and returns its text content.
pub(crate) struct FetchWebpage {
    ctx: Arc<ToolContext>,
}

impl FetchWebpage {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
}

#[async_trait]
impl ToolHandler for FetchWebpage {
    fn name(&self) -> &str {
        "fetch_webpage"
    }

    fn description(&self) -> &str {
        "Fetch and extract text content from a URL"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().required("url", FieldKind::String, "URL to fetch")
    }

    fn timeout(&self) -> Duration {
        FETCH_TIMEOUT + Duration::from_secs(5)
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: FetchArgs = parse_args(self.name(), input)?;
        let url = checked_url(self.name(), &args.url)?;
        debug!(url = %url, "fetching page");

        let response = self
            .ctx
            .http
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| request_error(self.name(), FETCH_TIMEOUT, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed {
                message: format!("HTTP {}", status.as_u16()),
                output: String::new(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !is_text_content(content_type.as_deref()) {
            return Err(ToolError::Failed {
                message: format!(
                    "Unsupported content type: {}",
                    content_type.unwrap_or_default()
                ),
                output: String::new(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| request_error(self.name(), FETCH_TIMEOUT, &e))?;

        let text = truncate_chars(&html_to_text(&body), MAX_PAGE_CHARS);
        Ok(format!(
            "URL: {}\nContent (truncated to {MAX_PAGE_CHARS} chars):\n{text}",
            args.url.trim()
        ))
    }
}

/// Whether a response body is worth converting to text. A missing header is accepted.
fn is_text_content(content_type: Option<&str>) -> bool {
    content_type.is_none_or(|ct| {
        let mime = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        mime.starts_with("text/") || mime.ends_with("json") || mime.ends_with("xml")
    })
}

/// `search_web`: top results from DuckDuckGo's HTML endpoint.
pub(crate) struct SearchWeb {
    ctx: Arc<ToolContext>,
    endpoint: String,
}

impl SearchWeb {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            endpoint: SEARCH_ENDPOINT.to_string(),
        }
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[async_trait]
impl ToolHandler for SearchWeb {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo and return top results"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().required("query", FieldKind::String, "Search query")
    }

    fn timeout(&self) -> Duration {
        FETCH_TIMEOUT + Duration::from_secs(5)
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: SearchArgs = parse_args(self.name(), input)?;
        let response = self
            .ctx
            .http
            .get(&self.endpoint)
            .query(&[("q", args.query.trim())])
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| request_error(self.name(), FETCH_TIMEOUT, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed {
                message: format!("HTTP {}", status.as_u16()),
                output: String::new(),
            });
        }
        let html = response
            .text()
            .await
            .map_err(|e| request_error(self.name(), FETCH_TIMEOUT, &e))?;

        let results = parse_search_results(&html);
        if results.is_empty() {
            return Ok("No results found".to_string());
        }
        Ok(results
            .iter()
            .enumerate()
            .map(|(i, (title, url))| format!("{}. {title} - {url}", i + 1))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// `http_request`: a single request to an external API.
pub(crate) struct HttpRequest {
    ctx: Arc<ToolContext>,
}

impl HttpRequest {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct HttpArgs {
    url: String,
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    body: Option<String>,
}

fn render_response(status: reqwest::StatusCode, headers: &Value, body: &str) -> String {
    format!(
        "Status: {} {}\nHeaders: {headers}\nBody:\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        truncate_chars(body, MAX_RESPONSE_CHARS)
    )
}

#[async_trait]
impl ToolHandler for HttpRequest {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request to an external API"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new()
            .required("url", FieldKind::String, "Request URL")
            .optional("method", FieldKind::String, "HTTP method (default GET)")
            .optional("headers", FieldKind::Object, "Request headers")
            .optional("body", FieldKind::String, "Request body for POST, PUT or PATCH")
    }

    fn timeout(&self) -> Duration {
        HTTP_TIMEOUT + Duration::from_secs(5)
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: HttpArgs = parse_args(self.name(), input)?;
        let url = checked_url(self.name(), &args.url)?;
        let method_name = args
            .method
            .as_deref()
            .unwrap_or("GET")
            .trim()
            .to_ascii_uppercase();
        let method =
            Method::from_bytes(method_name.as_bytes()).map_err(|_| ToolError::InvalidInput {
                name: self.name().to_string(),
                message: format!("unsupported method '{method_name}'"),
            })?;

        let mut request = self
            .ctx
            .http
            .request(method.clone(), url)
            .timeout(HTTP_TIMEOUT);
        for (key, value) in &args.headers {
            request = request.header(key, value);
        }
        if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
            if let Some(body) = args.body {
                self.ctx.guardrails.check_payload(body.len())?;
                let has_content_type = args
                    .headers
                    .keys()
                    .any(|k| k.eq_ignore_ascii_case("content-type"));
                if !has_content_type {
                    request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
                }
                request = request.body(body);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(self.name(), HTTP_TIMEOUT, &e))?;
        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| request_error(self.name(), HTTP_TIMEOUT, &e))?;

        let rendered = render_response(status, &Value::Object(headers), &body);
        if status.is_success() {
            Ok(rendered)
        } else {
            Err(ToolError::Failed {
                message: format!("HTTP {}", status.as_u16()),
                output: rendered,
            })
        }
    }
}
