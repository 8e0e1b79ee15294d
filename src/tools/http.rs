//! HTTP fetch tool - download a URL into the session directory

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use super::{parse_args, Emitter, Tool, ToolContext, ToolResult};
use crate::agent::callbacks::ProgressMessage;

/// Netscape-format cookie jar looked up in the session directory.
pub const COOKIES_FILE: &str = "cookies.txt";

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Fetch a URL via HTTP GET and save it to a file
pub struct HttpFetchTool {
    client: Client,
}

impl HttpFetchTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Use a preconfigured client (custom proxies, TLS settings).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    use_cookies: Option<bool>,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    header: Vec<String>,
    #[serde(default)]
    timeout: Option<f64>,
}

/// One line of a Netscape cookie file.
#[derive(Debug, Clone, PartialEq)]
struct Cookie {
    domain: String,
    path: String,
    secure: bool,
    name: String,
    value: String,
}

impl Cookie {
    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else { return false };
        let domain = self.domain.trim_start_matches('.');
        let domain_ok = host == domain || host.ends_with(&format!(".{domain}"));
        let path_ok = url.path().starts_with(&self.path);
        let scheme_ok = !self.secure || url.scheme() == "https";
        domain_ok && path_ok && scheme_ok
    }
}

fn parse_cookies(content: &str) -> Vec<Cookie> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 7 {
                return None;
            }
            Some(Cookie {
                domain: parts[0].to_string(),
                path: parts[2].to_string(),
                secure: parts[3].eq_ignore_ascii_case("TRUE"),
                name: parts[5].to_string(),
                value: parts[6].to_string(),
            })
        })
        .collect()
}

fn cookie_header(cookies: &[Cookie], url: &Url) -> Option<String> {
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| c.matches(url))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}

/// Last path segment of the URL, without query, or `output`.
fn default_output_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| "output".to_string())
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let Some((name, value)) = line.split_once(": ") else {
            return Err(format!("Invalid header format: {line}. Expected 'Name: Value'"));
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| format!("Invalid header name: {name}"))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| format!("Invalid header value for {}", name.as_str()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL via HTTP GET and save it to a file in the media directory.\n\
         Uses cookies.txt from the media directory when present."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"},
                "output": {
                    "type": "string",
                    "description": "Output filename (defaults to the URL's filename or 'output')"
                },
                "use_cookies": {
                    "type": "boolean",
                    "description": "Send cookies from cookies.txt (default: true if cookies.txt exists)"
                },
                "user_agent": {"type": "string", "description": "Custom User-Agent header"},
                "header": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Additional headers as 'Name: Value'"
                },
                "timeout": {"type": "number", "description": "Request timeout in seconds (default 30)"}
            },
            "required": ["url"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: FetchArgs = parse_args(self.name(), args)?;
        out.progress(ProgressMessage::new(format!("Fetching {}", args.url)).with_ratio(0.1));

        let url = match Url::parse(&args.url) {
            Ok(url) => url,
            Err(e) => {
                out.error(format!("Invalid URL {}: {e}", args.url));
                return Ok(());
            }
        };

        let mut headers = match parse_headers(&args.header) {
            Ok(h) => h,
            Err(msg) => {
                out.error(msg);
                return Ok(());
            }
        };
        if let Some(agent) = &args.user_agent {
            match HeaderValue::from_str(agent) {
                Ok(value) => {
                    headers.insert(USER_AGENT, value);
                }
                Err(_) => {
                    out.error(format!("Invalid User-Agent: {agent}"));
                    return Ok(());
                }
            }
        }

        let cookies_path = ctx.cwd.join(COOKIES_FILE);
        let use_cookies = args.use_cookies.unwrap_or_else(|| cookies_path.exists());
        if use_cookies {
            if !cookies_path.exists() {
                out.error(format!("cookies.txt not found in {}", ctx.cwd.display()));
                return Ok(());
            }
            let jar = parse_cookies(&std::fs::read_to_string(&cookies_path)?);
            if let Some(value) = cookie_header(&jar, &url) {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(COOKIE, value);
                }
            }
        }

        let output = args
            .output
            .clone()
            .unwrap_or_else(|| default_output_name(&url));
        let output_path = ctx.resolve(&output)?;
        let display_name = output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(output);

        let timeout = args.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS).max(0.1);
        out.progress(ProgressMessage::new("Sending request"));
        debug!("GET {}", url);

        let request = self
            .client
            .get(url.clone())
            .headers(headers)
            .timeout(Duration::from_secs_f64(timeout));

        let mut response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                out.error(describe_request_error(&e, timeout));
                return Ok(());
            }
        };

        let status = response.status();
        if !status.is_success() {
            out.error(format!(
                "HTTP error {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ));
            return Ok(());
        }

        let total = response.content_length().filter(|n| *n > 0);
        out.progress(ProgressMessage::new(format!("Downloading to {display_name}")));

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&output_path).await?;
        let mut downloaded: u64 = 0;
        let mut last_report: Option<Instant> = None;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    out.error(describe_request_error(&e, timeout));
                    return Ok(());
                }
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total {
                if last_report.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
                    last_report = Some(Instant::now());
                    out.progress(
                        ProgressMessage::new(format!("Downloaded {downloaded}/{total} bytes"))
                            .with_ratio(downloaded as f64 / total as f64),
                    );
                }
            }
        }
        file.flush().await?;

        out.success(format!(
            "Saved {} ({:.1} KB, status {})",
            display_name,
            downloaded as f64 / 1024.0,
            status.as_u16()
        ));
        Ok(())
    }
}

fn describe_request_error(e: &reqwest::Error, timeout: f64) -> String {
    if e.is_timeout() {
        format!("Request timed out after {timeout} seconds")
    } else {
        format!("Request failed: {e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::adapter::invoke;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    fn tool() -> HttpFetchTool {
        HttpFetchTool::with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_cookie_matching() {
        let jar = parse_cookies(
            "# Netscape HTTP Cookie File\n\
             .example.com\tTRUE\t/\tFALSE\t0\tsid\tabc\n\
             secure.example.com\tFALSE\t/\tTRUE\t0\ttoken\txyz\n\
             other.org\tFALSE\t/\tFALSE\t0\tnope\t1\n\
             broken line\n",
        );
        assert_eq!(jar.len(), 3);

        let http = Url::parse("http://www.example.com/video").unwrap();
        assert_eq!(cookie_header(&jar, &http).as_deref(), Some("sid=abc"));

        let https = Url::parse("https://secure.example.com/").unwrap();
        assert_eq!(cookie_header(&jar, &https).as_deref(), Some("sid=abc; token=xyz"));

        let unrelated = Url::parse("https://notexample.com/").unwrap();
        assert_eq!(cookie_header(&jar, &unrelated), None);
    }

    #[test]
    fn test_default_output_name() {
        let name = |u: &str| default_output_name(&Url::parse(u).unwrap());
        assert_eq!(name("https://x.org/files/report.pdf?sig=1"), "report.pdf");
        assert_eq!(name("https://x.org/files/"), "files");
        assert_eq!(name("https://x.org"), "output");
    }

    #[test]
    fn test_header_parsing() {
        let ok = parse_headers(&["Accept: text/html".to_string()]).unwrap();
        assert_eq!(ok.get("accept").unwrap(), "text/html");
        let err = parse_headers(&["Accept=text/html".to_string()]).unwrap_err();
        assert!(err.starts_with("Invalid header format"));
    }

    #[tokio::test]
    async fn test_fetch_saves_file() {
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = invoke(
            &tool(),
            json!({"url": format!("{base}/media/clip.txt"), "header": ["X-Test: 1"]}),
            &ctx,
        )
        .await;

        assert_eq!(result, "Saved clip.txt (0.0 KB, status 200)");
        assert_eq!(std::fs::read_to_string(tmp.path().join("clip.txt")).unwrap(), "hello");
        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("x-test: 1"));
    }

    #[tokio::test]
    async fn test_fetch_reports_http_errors() {
        let (base, _server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::new(tmp.path());

        let result = invoke(&tool(), json!({"url": format!("{base}/missing")}), &ctx).await;
        assert_eq!(result, "HTTP error 404: Not Found");
    }

    #[tokio::test]
    async fn test_fetch_rejects_escaping_output() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::new(tmp.path());
        let result = invoke(
            &tool(),
            json!({"url": "http://127.0.0.1:9/x", "output": "../x"}),
            &ctx,
        )
        .await;
        assert!(result.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_missing_cookie_file() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::new(tmp.path());
        let result = invoke(
            &tool(),
            json!({"url": "http://127.0.0.1:9/x", "use_cookies": true}),
            &ctx,
        )
        .await;
        assert!(result.starts_with("cookies.txt not found"));
    }
}
