use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use intercache::{
    CacheEngine, Decision, Method, ObserveOutcome, RequestDescriptor, ResourceKind,
    ResponseDescriptor,
};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::AppError;

/// How a fetched URL was satisfied
#[derive(Debug)]
enum Source {
    Cache,
    Network(ObserveOutcome),
}

#[derive(Debug)]
struct Fetched {
    url: Url,
    status: u16,
    body: Bytes,
    source: Source,
}

/// Runs the host side of the cache: intercept, perform, observe.
pub struct Host {
    engine: Arc<CacheEngine>,
    client: Client,
}

impl Host {
    pub fn new(engine: Arc<CacheEngine>, headers: HeaderMap) -> Result<Self, AppError> {
        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("intercache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { engine, client })
    }

    /// Fetch every URL concurrently. Failed URLs are reported and skipped;
    /// the call fails only if all of them failed.
    pub async fn fetch_all(
        &self,
        urls: &[String],
        kind: ResourceKind,
        output_dir: Option<&Path>,
    ) -> Result<(), AppError> {
        if let Some(dir) = output_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let results = join_all(urls.iter().map(|url| self.fetch(url, kind))).await;

        let mut failures = 0;
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(fetched) => {
                    let source = match fetched.source {
                        Source::Cache => "cache".to_string(),
                        Source::Network(outcome) => format!("network, {outcome:?}"),
                    };
                    println!(
                        "{} {} ({} bytes, {source})",
                        fetched.status,
                        fetched.url,
                        fetched.body.len()
                    );
                    if let Some(dir) = output_dir {
                        let path = dir.join(file_name_for(&fetched.url));
                        tokio::fs::write(&path, &fetched.body).await?;
                        debug!(path = ?path, "Saved body");
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(url = %url, error = %e, "Fetch failed");
                    eprintln!("{url}: {e}");
                }
            }
        }

        if failures > 0 && failures == urls.len() {
            return Err(AppError::InvalidInput(format!(
                "all {failures} requests failed"
            )));
        }
        Ok(())
    }

    async fn fetch(&self, url: &str, kind: ResourceKind) -> Result<Fetched, AppError> {
        let request = parse_request(url, kind)?;

        let pass = match self.engine.intercept(&request).await {
            Decision::Serve(response) => {
                info!(url = %request.url, "Served from cache");
                return Ok(Fetched {
                    url: request.url,
                    status: response.status,
                    body: response.body,
                    source: Source::Cache,
                });
            }
            Decision::Pass(pass) => pass,
        };

        debug!(url = %request.url, role = ?pass.role, "Fetching from network");
        let response = self.client.get(request.url.clone()).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        let outcome = self
            .engine
            .observe(
                ResponseDescriptor::new(pass, final_url, status)
                    .with_headers(headers)
                    .with_body(body.clone()),
            )
            .await;
        info!(url = %request.url, status, outcome = ?outcome, "Fetched from network");

        Ok(Fetched {
            url: request.url,
            status,
            body,
            source: Source::Network(outcome),
        })
    }
}

pub async fn lookup(engine: &CacheEngine, url: &str, kind: ResourceKind) -> Result<(), AppError> {
    let request = parse_request(url, kind)?;
    let key = engine.key_for(&request);
    match engine.lookup(&request).await {
        Some(response) => {
            println!("HIT {key}");
            println!("status: {}", response.status);
            for (name, value) in &response.headers {
                println!("{name}: {value}");
            }
        }
        None => println!("MISS {key}"),
    }
    Ok(())
}

pub async fn purge(engine: &CacheEngine, url: &str, kind: ResourceKind) -> Result<(), AppError> {
    let request = parse_request(url, kind)?;
    engine.purge(&request).await?;
    println!("Purged {}", engine.key_for(&request));
    Ok(())
}

pub async fn clear(engine: &CacheEngine) -> Result<(), AppError> {
    engine.clear().await?;
    println!("Cache cleared: {}", engine.config().root_dir.display());
    Ok(())
}

pub async fn stats(engine: &CacheEngine) -> Result<(), AppError> {
    let stats = engine.stats().await;
    println!("directory:   {}", engine.config().root_dir.display());
    println!("entries:     {}", stats.entries);
    println!("body bytes:  {}", stats.body_bytes);
    println!("in flight:   {}", stats.in_flight);
    Ok(())
}

fn parse_request(url: &str, kind: ResourceKind) -> Result<RequestDescriptor, AppError> {
    RequestDescriptor::parse(Method::Get, url, kind)
        .map_err(|e| AppError::InvalidInput(format!("Invalid URL '{url}': {e}")))
}

/// Local file name for a saved body: the last path segment, or `index`.
fn file_name_for(url: &Url) -> PathBuf {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("index");
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    PathBuf::from(sanitized)
}
