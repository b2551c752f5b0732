//! WebDAV storage over HTTP(S) via `reqwest`.
//!
//! Directory listings use `PROPFIND` with `Depth: 1`, single entries with
//! `Depth: 0`. The multistatus response is parsed leniently with regexes
//! rather than a full XML stack: servers disagree wildly on namespaces and
//! prefixes, and the four properties we ask for are flat text nodes.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use regex::Regex;
use reqwest::{Method, StatusCode, header};
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use fathom_config::Secret;
use fathom_model::{FileKind, FileRecord, Protocol, RootId, Sourced};

use crate::client::{FileReader, StorageClient, clean_relative};
use crate::context::OpContext;
use crate::error::{FsError, Result};

static PROPFIND: LazyLock<Method> = LazyLock::new(|| {
    Method::from_bytes(b"PROPFIND").expect("valid extension method")
});
static MKCOL: LazyLock<Method> = LazyLock::new(|| {
    Method::from_bytes(b"MKCOL").expect("valid extension method")
});
static MOVE: LazyLock<Method> = LazyLock::new(|| {
    Method::from_bytes(b"MOVE").expect("valid extension method")
});

static RESPONSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(?:[a-z0-9_-]+:)?response[\s>].*?</(?:[a-z0-9_-]+:)?response\s*>",
    )
    .expect("valid response pattern")
});
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:[a-z0-9_-]+:)?href[^>]*>(.*?)</(?:[a-z0-9_-]+:)?href\s*>")
        .expect("valid href pattern")
});
static DISPLAYNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(?:[a-z0-9_-]+:)?displayname[^>]*>(.*?)</(?:[a-z0-9_-]+:)?displayname\s*>",
    )
    .expect("valid displayname pattern")
});
static LENGTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(?:[a-z0-9_-]+:)?getcontentlength[^>]*>(.*?)</(?:[a-z0-9_-]+:)?getcontentlength\s*>",
    )
    .expect("valid getcontentlength pattern")
});
static MODIFIED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(?:[a-z0-9_-]+:)?getlastmodified[^>]*>(.*?)</(?:[a-z0-9_-]+:)?getlastmodified\s*>",
    )
    .expect("valid getlastmodified pattern")
});
static COLLECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:[a-z0-9_-]+:)?collection\b")
        .expect("valid collection pattern")
});

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:displayname/>
    <D:getcontentlength/>
    <D:getlastmodified/>
    <D:resourcetype/>
  </D:prop>
</D:propfind>"#;

#[derive(Debug)]
pub struct WebdavClient {
    root_id: RootId,
    http: reqwest::Client,
    base: Url,
    /// Decoded base path without trailing slash, for matching hrefs.
    base_dav_path: String,
    username: Option<String>,
    password: Option<Secret>,
}

/// One `<response>` block of a multistatus body, reduced to what we track.
#[derive(Debug)]
struct DavEntry {
    rel: String,
    display_name: Option<String>,
    is_collection: bool,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

impl WebdavClient {
    pub fn new(
        root_id: RootId,
        raw_url: &str,
        username: Option<String>,
        password: Option<Secret>,
    ) -> Result<Self> {
        let mut base = Url::parse(raw_url).map_err(|err| {
            FsError::Config(format!("invalid webdav url {raw_url}: {err}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(FsError::Config(format!(
                "webdav url must be http or https, got {}",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let base_dav_path =
            percent_decode(base.path().trim_end_matches('/')).to_string();

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| {
                FsError::Config(format!("building http client: {err}"))
            })?;

        Ok(WebdavClient {
            root_id,
            http,
            base,
            base_dav_path,
            username: username.filter(|user| !user.is_empty()),
            password,
        })
    }

    fn url_for(&self, clean: &str) -> Result<Url> {
        if clean.is_empty() {
            return Ok(self.base.clone());
        }
        self.base.join(&encode_rel_path(clean)).map_err(|err| {
            FsError::Permanent(format!("cannot address path {clean}: {err}"))
        })
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(
                user,
                self.password.as_ref().map(|secret| secret.expose()),
            ),
            None => builder,
        }
    }

    async fn propfind(
        &self,
        ctx: &OpContext,
        what: &str,
        url: Url,
        depth: &str,
    ) -> Result<String> {
        ctx.bound(what, async {
            let response = self
                .request(PROPFIND.clone(), url)
                .header("Depth", depth)
                .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
                .body(PROPFIND_BODY)
                .send()
                .await
                .map_err(|err| classify_transport(what, &err))?;
            let response = expect_success(what, response)?;
            response
                .text()
                .await
                .map_err(|err| classify_transport(what, &err))
        })
        .await
    }

    /// Map a decoded href path onto our root-relative convention. Entries
    /// outside the configured base (server aliases, odd mounts) yield `None`.
    fn rel_from_href(&self, href_path: &str) -> Option<String> {
        let path = href_path.trim_end_matches('/');
        if path == self.base_dav_path {
            return Some(String::new());
        }
        path.strip_prefix(&format!("{}/", self.base_dav_path))
            .map(str::to_string)
    }

    fn parse_multistatus(&self, body: &str) -> Vec<DavEntry> {
        let mut entries = Vec::new();
        for block_match in RESPONSE_RE.find_iter(body) {
            let block = block_match.as_str();
            let Some(href_raw) =
                HREF_RE.captures(block).and_then(|caps| caps.get(1))
            else {
                continue;
            };
            let href_path = href_to_path(&xml_unescape(href_raw.as_str()));
            let Some(rel) = self.rel_from_href(&href_path) else {
                debug!(
                    href = href_raw.as_str(),
                    "skipping entry outside the configured base"
                );
                continue;
            };
            let display_name = DISPLAYNAME_RE
                .captures(block)
                .and_then(|caps| caps.get(1))
                .map(|found| xml_unescape(found.as_str().trim()))
                .filter(|name| !name.is_empty());
            let size = LENGTH_RE
                .captures(block)
                .and_then(|caps| caps.get(1))
                .and_then(|found| found.as_str().trim().parse::<u64>().ok())
                .unwrap_or(0);
            let modified = MODIFIED_RE
                .captures(block)
                .and_then(|caps| caps.get(1))
                .and_then(|found| parse_http_date(found.as_str().trim()));
            entries.push(DavEntry {
                rel,
                display_name,
                is_collection: COLLECTION_RE.is_match(block),
                size,
                modified,
            });
        }
        entries
    }

    fn record_from_entry(&self, entry: DavEntry) -> FileRecord {
        let kind = if entry.is_collection {
            FileKind::Directory
        } else {
            FileKind::File
        };
        let mut record = FileRecord::new(self.root_id, entry.rel, kind);
        if let Some(name) = entry.display_name {
            record.name = name;
        }
        record.size = entry.size;
        record.modified = entry.modified;
        record
    }
}

#[async_trait]
impl StorageClient for WebdavClient {
    fn protocol(&self) -> Protocol {
        Protocol::Webdav
    }

    fn root_id(&self) -> RootId {
        self.root_id
    }

    async fn probe(&self, ctx: &OpContext) -> Result<()> {
        ctx.bound("probe", async {
            let response = self
                .request(Method::OPTIONS, self.base.clone())
                .send()
                .await
                .map_err(|err| classify_transport("probe", &err))?;
            expect_success("probe", response).map(|_| ())
        })
        .await
    }

    async fn list(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<Vec<FileRecord>>> {
        let clean = clean_relative(path)?;
        let url = self.url_for(&clean)?;
        let what = format!("list {clean}");
        let body = self.propfind(ctx, &what, url, "1").await?;

        let records = self
            .parse_multistatus(&body)
            .into_iter()
            // Depth 1 includes the collection itself; children only.
            .filter(|entry| entry.rel != clean)
            .map(|entry| self.record_from_entry(entry))
            .collect();
        Ok(Sourced::live(records))
    }

    async fn stat(
        &self,
        ctx: &OpContext,
        path: &str,
    ) -> Result<Sourced<FileRecord>> {
        let clean = clean_relative(path)?;
        let url = self.url_for(&clean)?;
        let what = format!("stat {clean}");
        let body = self.propfind(ctx, &what, url, "0").await?;

        let mut entries = self.parse_multistatus(&body);
        if entries.is_empty() {
            return Err(FsError::NotFound(format!(
                "{what}: empty multistatus"
            )));
        }
        let mut entry = entries.swap_remove(0);
        // Trust the requested path over whatever alias the server echoed.
        entry.rel = clean;
        Ok(Sourced::live(self.record_from_entry(entry)))
    }

    async fn open(&self, ctx: &OpContext, path: &str) -> Result<FileReader> {
        let clean = clean_relative(path)?;
        let url = self.url_for(&clean)?;
        let what = format!("open {clean}");
        let response = ctx
            .bound(&what, async {
                let response = self
                    .request(Method::GET, url)
                    .send()
                    .await
                    .map_err(|err| classify_transport(&what, &err))?;
                expect_success(&what, response)
            })
            .await?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))) as FileReader)
    }

    async fn write(
        &self,
        ctx: &OpContext,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        let clean = clean_relative(path)?;
        let url = self.url_for(&clean)?;
        let what = format!("write {clean}");
        let payload = data.to_vec();
        ctx.bound(&what, async {
            let response = self
                .request(Method::PUT, url)
                .body(payload)
                .send()
                .await
                .map_err(|err| classify_transport(&what, &err))?;
            expect_success(&what, response).map(|_| ())
        })
        .await
    }

    async fn delete(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let clean = clean_relative(path)?;
        let url = self.url_for(&clean)?;
        let what = format!("delete {clean}");
        ctx.bound(&what, async {
            let response = self
                .request(Method::DELETE, url)
                .send()
                .await
                .map_err(|err| classify_transport(&what, &err))?;
            expect_success(&what, response).map(|_| ())
        })
        .await
    }

    async fn rename(
        &self,
        ctx: &OpContext,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let from_clean = clean_relative(from)?;
        let from_url = self.url_for(&from_clean)?;
        let to_url = self.url_for(&clean_relative(to)?)?;
        let what = format!("rename {from_clean}");
        ctx.bound(&what, async {
            let response = self
                .request(MOVE.clone(), from_url)
                .header("Destination", to_url.as_str())
                .header("Overwrite", "T")
                .send()
                .await
                .map_err(|err| classify_transport(&what, &err))?;
            expect_success(&what, response).map(|_| ())
        })
        .await
    }

    async fn exists(&self, ctx: &OpContext, path: &str) -> Result<bool> {
        match self.stat(ctx, path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_dir(&self, ctx: &OpContext, path: &str) -> Result<()> {
        let clean = clean_relative(path)?;
        let mut prefix = String::new();
        for segment in clean.split('/').filter(|part| !part.is_empty()) {
            prefix = if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{prefix}/{segment}")
            };
            let url = self.url_for(&prefix)?;
            let what = format!("create_dir {prefix}");
            let status = ctx
                .bound(&what, async {
                    self.request(MKCOL.clone(), url)
                        .send()
                        .await
                        .map_err(|err| classify_transport(&what, &err))
                })
                .await?
                .status();
            // 405 means the collection is already there.
            if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED
            {
                continue;
            }
            return Err(classify_status(&what, status));
        }
        Ok(())
    }
}

fn expect_success(
    what: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::MULTI_STATUS {
        Ok(response)
    } else {
        Err(classify_status(what, status))
    }
}

/// HTTP status to taxonomy. Client errors are mostly permanent, server
/// errors transient; 404/410 carry the dedicated not-found meaning so the
/// retry layer never hammers a missing path.
fn classify_status(what: &str, status: StatusCode) -> FsError {
    match status.as_u16() {
        404 | 410 => FsError::NotFound(format!("{what}: {status}")),
        408 | 423 | 429 => FsError::Transient(format!("{what}: {status}")),
        code if code >= 500 => FsError::Transient(format!("{what}: {status}")),
        _ => FsError::Permanent(format!("{what}: {status}")),
    }
}

fn classify_transport(what: &str, err: &reqwest::Error) -> FsError {
    if err.is_timeout() {
        FsError::Timeout(format!("{what}: {err}"))
    } else {
        FsError::Transient(format!("{what}: {err}"))
    }
}

/// Percent-encode the characters that would change how `Url::join`
/// interprets a relative path. Everything else is left for `Url` to encode.
fn encode_rel_path(clean: &str) -> String {
    let mut out = String::with_capacity(clean.len());
    for ch in clean.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            _ => out.push(ch),
        }
    }
    out
}

/// Reduce an href to its decoded path, dropping any scheme and authority.
fn href_to_path(href: &str) -> String {
    let trimmed = href.trim();
    let path_part = if let Some(idx) = trimmed.find("://") {
        match trimmed[idx + 3..].find('/') {
            Some(slash) => &trimmed[idx + 3 + slash..],
            None => "/",
        }
    } else {
        trimmed
    };
    percent_decode(path_part)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (
                (bytes[i + 1] as char).to_digit(16),
                (bytes[i + 2] as char).to_digit(16),
            )
        {
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn xml_unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                if let Some(hex) = entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                {
                    if let Ok(code) = u32::from_str_radix(hex, 16)
                        && let Some(ch) = char::from_u32(code)
                    {
                        out.push(ch);
                    }
                } else if let Some(dec) = entity.strip_prefix('#') {
                    if let Ok(code) = dec.parse::<u32>()
                        && let Some(ch) = char::from_u32(code)
                    {
                        out.push(ch);
                    }
                } else {
                    // Unknown entity, keep it verbatim.
                    out.push('&');
                    out.push_str(entity);
                    out.push(';');
                }
            }
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
