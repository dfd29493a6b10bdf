//! Subcommand implementations. Each one is a single host event (or a
//! read-only look at the cache namespace) delivered to a fresh worker.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use swcache_core::{
    CacheStorage, DiskStorage, HttpFetcher, Method, Request, ServiceWorker, WorkerState,
};
use tracing::info;
use url::Url;

use crate::config::Config;
use crate::format::{body_preview, format_bytes, truncate_string};

pub type Worker = ServiceWorker<HttpFetcher, DiskStorage>;

/// Width of the key column in `status --entries`
const KEY_DISPLAY_WIDTH: usize = 90;

pub fn build_worker(config: &Config, cache_dir: &Path) -> Result<Worker> {
    let fetcher = HttpFetcher::with_timeout(Duration::from_secs(config.request_timeout_secs))
        .context("Failed to build HTTP client")?;
    let storage = DiskStorage::new(cache_dir.to_path_buf())
        .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;
    let worker = ServiceWorker::new(config.worker.clone(), fetcher, storage)
        .context("Invalid worker configuration")?;
    Ok(worker)
}

/// The worker that controls requests. Until the configured version is
/// active, the version named in the active slot keeps serving as long as its
/// store is still on disk.
pub fn controlling_worker(config: &Config, cache_dir: &Path) -> Result<Worker> {
    let worker = build_worker(config, cache_dir)?;
    if worker.resume()? == WorkerState::Active {
        return Ok(worker);
    }

    let Some(active) = worker.storage().active_version()? else {
        return Ok(worker);
    };
    if active.version == worker.cache_name() || !worker.storage().has(&active.version)? {
        return Ok(worker);
    }

    info!(
        configured = worker.cache_name(),
        serving = %active.version,
        "Configured version is not active, previous version keeps serving"
    );
    let mut previous = config.clone();
    previous.worker.cache_name = active.version;
    let fallback = build_worker(&previous, cache_dir)?;
    fallback.resume()?;
    Ok(fallback)
}

pub async fn install(worker: &Worker) -> Result<()> {
    let outcome = worker.on_install().await.context("Install failed")?;
    println!(
        "Installed {} ({} cached, {} skipped)",
        outcome.cache_name,
        outcome.cached,
        outcome.skipped.len()
    );
    for url in &outcome.skipped {
        println!("  skipped {}", url);
    }
    Ok(())
}

pub async fn activate(worker: &Worker) -> Result<()> {
    match worker.resume()? {
        WorkerState::Active => {
            println!("{} is already active", worker.cache_name());
            Ok(())
        }
        WorkerState::Installed => {
            let outcome = worker.on_activate().await.context("Activation failed")?;
            println!("Activated {}", outcome.cache_name);
            for name in &outcome.deleted {
                println!("  deleted old cache {}", name);
            }
            Ok(())
        }
        other => bail!(
            "{} is {}; run `swcache install` first",
            worker.cache_name(),
            other
        ),
    }
}

pub async fn update(worker: &Worker) -> Result<()> {
    install(worker).await?;
    let outcome = worker.on_activate().await.context("Activation failed")?;
    println!("Activated {}", outcome.cache_name);
    for name in &outcome.deleted {
        println!("  deleted old cache {}", name);
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header {:?}, expected \"Name: value\"", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header {:?}, empty name", raw);
    }
    Ok((name, value.trim()))
}

/// `worker` must already be resumed; see `controlling_worker`.
pub async fn fetch(
    worker: &Worker,
    url: &str,
    method: Method,
    headers: &[String],
    include: bool,
) -> Result<()> {
    let url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    let mut request = Request::new(method, url);
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        request = request.with_header(name, value);
    }

    let state = worker.state();
    if state != WorkerState::Active {
        eprintln!(
            "note: {} is {}, request goes straight to the network",
            worker.cache_name(),
            state
        );
    }

    let class = worker.classify(&request.url);
    info!(url = %request.url, class = %class, "Delivering fetch event");

    let response = worker
        .on_fetch(&request)
        .await
        .with_context(|| format!("Failed to fetch {}", request.url))?;

    let mut stdout = io::stdout().lock();
    if include {
        writeln!(stdout, "HTTP {}", response.status)?;
        for (name, value) in &response.headers {
            writeln!(stdout, "{}: {}", name, value)?;
        }
        writeln!(stdout)?;
    }
    stdout.write_all(&response.body)?;
    stdout.flush()?;
    Ok(())
}

pub fn classify(worker: &Worker, url: &str) -> Result<()> {
    let url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    let class = worker.classify(&url);
    println!("{} ({})", class, class.strategy_name());
    Ok(())
}

pub fn status(worker: &Worker, entries: bool) -> Result<()> {
    let storage = worker.storage();
    let state = worker.resume()?;

    match storage.active_version()? {
        Some(active) => println!(
            "Active version:     {} (since {})",
            active.version,
            active.activated_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("Active version:     none"),
    }
    println!("Configured version: {} ({})", worker.cache_name(), state);
    println!("Cache directory:    {}", storage.root().display());

    let names = storage.cache_names()?;
    if names.is_empty() {
        println!("No cache stores");
        return Ok(());
    }

    for name in names {
        let keys = storage.keys(&name)?;
        let marker = if name == worker.cache_name() { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, keys.len());
        if !entries {
            continue;
        }
        for key in keys {
            if let Some(cached) = storage.match_request(&name, &key)? {
                println!(
                    "    {}  {:>9}  {:>9}  {}  {}",
                    cached.response.status,
                    format_bytes(cached.response.body.len()),
                    cached.age_display(),
                    truncate_string(&key, KEY_DISPLAY_WIDTH),
                    body_preview(&cached.response.body, 24),
                );
            }
        }
    }
    Ok(())
}
