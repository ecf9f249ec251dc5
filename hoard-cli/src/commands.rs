use std::path::PathBuf;

use chrono::Utc;
use futures::future::join_all;
use hoard_engine::{BoundedCache, CacheLimit, Hoard, ResourceItem, SizeHint, resource_key};
use indicatif::MultiProgress;
use tracing::{error, info};

use crate::cli::Command;
use crate::error::AppError;
use crate::utils::progress::ProgressManager;
use crate::utils::{format_age, format_bytes, parse_size};

pub async fn run(hoard: &Hoard, command: Command) -> Result<(), AppError> {
    match command {
        Command::Fetch {
            urls,
            reload,
            show_progress,
            bytes,
        } => fetch(hoard, &urls, reload, show_progress, bytes).await,
        Command::List => {
            list(cache(hoard)?).await;
            Ok(())
        }
        Command::Evict { url } => evict(cache(hoard)?, &url).await,
        Command::Clear => {
            let cache = cache(hoard)?;
            let entries = cache.len();
            cache.clear().await;
            println!("Cleared {entries} entries from {}", cache.root().display());
            Ok(())
        }
        Command::Limits { size, count } => limits(cache(hoard)?, size, count).await,
    }
}

fn cache(hoard: &Hoard) -> Result<&BoundedCache, AppError> {
    hoard
        .cache()
        .ok_or_else(|| AppError::InvalidInput("caching is disabled".to_string()))
}

async fn fetch(
    hoard: &Hoard,
    urls: &[String],
    reload: bool,
    show_progress: bool,
    bytes: Option<u64>,
) -> Result<(), AppError> {
    let multi = MultiProgress::new();
    let progress = if show_progress {
        ProgressManager::new(multi)
    } else {
        ProgressManager::new_disabled(multi)
    };

    let fetches = urls.iter().map(|url| {
        let item = hoard.item(url.as_str());
        if let Some(observer) = progress.observer_for(url) {
            item.subscribe(observer);
        }
        async move { (url, fetch_one(item, reload, bytes).await) }
    });

    let mut failed = 0;
    for (url, result) in join_all(fetches).await {
        match result {
            Ok((path, None)) => println!("{url} -> {}", path.display()),
            Ok((path, Some(read))) => {
                println!("{url} -> {} ({})", path.display(), format_bytes(read as u64))
            }
            Err(e) => {
                failed += 1;
                error!(url = %url, error = %e, "Fetch failed");
            }
        }
    }

    if failed > 0 {
        return Err(AppError::FetchFailed {
            failed,
            total: urls.len(),
        });
    }
    Ok(())
}

async fn fetch_one(
    item: ResourceItem,
    reload: bool,
    bytes: Option<u64>,
) -> Result<(PathBuf, Option<usize>), AppError> {
    let path = if reload {
        item.reload().await?
    } else {
        item.load().await?
    };

    let Some(max_bytes) = bytes else {
        return Ok((path, None));
    };
    let content = item.request_content(SizeHint::max_bytes(max_bytes)).await?;
    Ok((item.local_path().unwrap_or(path), Some(content.len())))
}

async fn list(cache: &BoundedCache) {
    let now = Utc::now();
    let entries = cache.entries();

    for entry in &entries {
        println!(
            "{:>6}  {:>10}  {}",
            format_age(entry.created_at, now),
            format_bytes(entry.size),
            entry.key
        );
    }

    println!(
        "{} entries (limit {}), {} (limit {})",
        entries.len(),
        cache.count_limit().await,
        format_bytes(cache.total_size()),
        describe_size_limit(cache.size_limit().await)
    );
}

async fn evict(cache: &BoundedCache, url: &str) -> Result<(), AppError> {
    let key = resource_key(url)?;
    match cache.evict(key.as_str()).await {
        Some(entry) => println!("Evicted {} ({})", entry.key, format_bytes(entry.size)),
        None => println!("{key} is not cached"),
    }
    Ok(())
}

async fn limits(
    cache: &BoundedCache,
    size: Option<String>,
    count: Option<u64>,
) -> Result<(), AppError> {
    let before = cache.len();

    if let Some(size) = size {
        let limit = CacheLimit::from_raw(parse_size(&size)?);
        info!(limit = %limit, "Applying size limit");
        cache.set_size_limit(limit).await;
    }
    if let Some(count) = count {
        let limit = CacheLimit::from_raw(count);
        info!(limit = %limit, "Applying count limit");
        cache.set_count_limit(limit).await;
    }

    println!(
        "Size limit: {}, count limit: {}",
        describe_size_limit(cache.size_limit().await),
        cache.count_limit().await
    );
    println!(
        "{} entries, {} ({} evicted)",
        cache.len(),
        format_bytes(cache.total_size()),
        before.saturating_sub(cache.len())
    );
    Ok(())
}

fn describe_size_limit(limit: CacheLimit) -> String {
    match limit {
        CacheLimit::Unlimited => limit.to_string(),
        CacheLimit::LimitedTo(max) => format_bytes(max),
    }
}
