use std::{sync::Arc, time::Duration};

use storyreel_lib::cache::{placeholder_png, MediaCache, StaticFetcher};
use tokio::time;

fn fetcher_with(keys: &[&str], latency: Duration) -> Arc<StaticFetcher> {
    let fetcher = StaticFetcher::new().with_latency(latency);
    let png = placeholder_png(200, 100, 50).unwrap();
    for key in keys {
        fetcher.insert(*key, png.clone());
    }
    Arc::new(fetcher)
}

async fn settle() {
    time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_lowest_priority_is_evicted() {
    let fetcher = fetcher_with(&["a", "b", "c"], Duration::ZERO);
    let cache = MediaCache::new(fetcher, 2, 8);

    cache.request("a", 5);
    cache.request("b", 3);
    cache.request("c", 10);
    settle().await;

    assert!(cache.is_cached("a"));
    assert!(!cache.is_cached("b"));
    assert!(cache.is_cached("c"));
    assert_eq!(cache.cached_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_drops_excess_requests() {
    let keys: Vec<String> = (0..20).map(|i| format!("https://m/{i}.jpg")).collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let fetcher = fetcher_with(&key_refs, Duration::from_secs(1));
    let cache = MediaCache::new(fetcher.clone(), 40, 8);

    for (index, key) in keys.iter().enumerate() {
        cache.request(key, index as i64);
        assert!(cache.inflight_len() <= 8);
    }
    assert_eq!(cache.inflight_len(), 8);
    assert!(!cache.is_inflight(&keys[8]));

    time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(cache.inflight_len(), 0);
    assert_eq!(cache.cached_len(), 8);
    assert_eq!(fetcher.request_count(), 8);

    // Dropped keys can be asked for again later.
    cache.request(&keys[8], 8);
    assert!(cache.is_inflight(&keys[8]));
}

#[tokio::test(start_paused = true)]
async fn test_cached_request_updates_priority_without_refetch() {
    let fetcher = fetcher_with(&["a"], Duration::ZERO);
    let cache = MediaCache::new(fetcher.clone(), 4, 8);

    cache.request("a", 5);
    settle().await;
    assert_eq!(cache.priority_of("a"), Some(5));

    cache.request("a", 50);
    settle().await;
    assert_eq!(cache.priority_of("a"), Some(50));
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inflight_priority_is_not_upgraded() {
    let fetcher = fetcher_with(&["a"], Duration::from_millis(200));
    let cache = MediaCache::new(fetcher.clone(), 4, 8);

    cache.request("a", 5);
    cache.request("a", 50);
    time::sleep(Duration::from_millis(300)).await;

    assert_eq!(cache.priority_of("a"), Some(5));
    assert_eq!(fetcher.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetches_are_dropped_silently() {
    let fetcher = Arc::new(StaticFetcher::new());
    fetcher.insert("not-an-image", b"<html>404</html>".to_vec());
    let cache = MediaCache::new(fetcher, 4, 8);

    cache.request("missing", 1);
    cache.request("not-an-image", 1);
    settle().await;

    assert_eq!(cache.inflight_len(), 0);
    assert_eq!(cache.cached_len(), 0);
    assert!(cache.get_cached("missing").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_clear_cancels_inflight_and_drops_blobs() {
    let fetcher = fetcher_with(&["a", "b"], Duration::from_millis(200));
    let cache = MediaCache::new(fetcher, 4, 8);

    cache.request("a", 1);
    time::sleep(Duration::from_millis(300)).await;
    assert!(cache.is_cached("a"));

    cache.request("b", 1);
    assert!(cache.is_inflight("b"));
    cache.clear();
    assert_eq!(cache.inflight_len(), 0);
    assert_eq!(cache.cached_len(), 0);

    time::sleep(Duration::from_millis(300)).await;
    assert!(!cache.is_cached("b"));
}

#[tokio::test(start_paused = true)]
async fn test_eviction_keeps_highest_priorities_overall() {
    let keys: Vec<String> = (0..12).map(|i| format!("k{i}")).collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let fetcher = fetcher_with(&key_refs, Duration::from_millis(10));
    let cache = MediaCache::new(fetcher, 5, 8);

    let priority = |index: usize| ((index * 7) % 12) as i64;
    for chunk in (0..12).collect::<Vec<_>>().chunks(4) {
        let batch: Vec<(String, i64)> = chunk
            .iter()
            .map(|&index| (keys[index].clone(), priority(index)))
            .collect();
        cache.request_batch(&batch);
        settle().await;
        assert!(cache.cached_len() <= 5);
    }

    let mut kept: Vec<i64> = (0..12)
        .filter(|&index| cache.is_cached(&keys[index]))
        .map(priority)
        .collect();
    kept.sort_unstable();
    assert_eq!(kept, vec![7, 8, 9, 10, 11]);
}
