// tests/cache_test.rs

use gas_lens::{AnalyzerConfig, ConstructScanner, DetectedConstruct, GasAnalyzer, PatternScanner};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const VAULT: &str = include_str!("fixtures/vault.sol");

/// Counts scans and holds each one open long enough for callers to overlap.
struct SlowScanner {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl ConstructScanner for SlowScanner {
    fn scan(&self, source: &str) -> Vec<DetectedConstruct> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        PatternScanner.scan(source)
    }
}

fn slow_analyzer(config: AnalyzerConfig, delay: Duration) -> (Arc<GasAnalyzer>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let scanner = SlowScanner {
        calls: Arc::clone(&calls),
        delay,
    };
    (Arc::new(GasAnalyzer::with_scanner(config, Box::new(scanner))), calls)
}

#[test]
fn test_concurrent_requests_share_one_pass() {
    let (analyzer, calls) = slow_analyzer(AnalyzerConfig::default(), Duration::from_millis(100));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let analyzer = Arc::clone(&analyzer);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                analyzer.analyze(VAULT, "file:///vault.sol")
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

    let stats = analyzer.cache_stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.hits, 7);
}

#[test]
fn test_different_documents_do_not_coordinate() {
    let (analyzer, calls) = slow_analyzer(AnalyzerConfig::default(), Duration::from_millis(20));
    let edited = VAULT.replace("fee = 25", "fee = 30");

    thread::scope(|s| {
        s.spawn(|| analyzer.analyze(VAULT, "a.sol"));
        s.spawn(|| analyzer.analyze(&edited, "b.sol"));
    });

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(analyzer.cache_stats().entries, 2);
}

#[test]
fn test_cached_result_is_identical() {
    let (analyzer, calls) = slow_analyzer(AnalyzerConfig::default(), Duration::ZERO);
    let first = analyzer.analyze(VAULT, "vault");
    let second = analyzer.analyze(VAULT, "vault");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*first, *second);
}

#[test]
fn test_any_edit_misses_the_cache() {
    let (analyzer, calls) = slow_analyzer(AnalyzerConfig::default(), Duration::ZERO);
    analyzer.analyze(VAULT, "vault");
    analyzer.analyze(&format!("{} ", VAULT), "vault");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_expired_entry_is_recomputed() {
    let mut config = AnalyzerConfig::default();
    config.cache_ttl_secs = 0;
    let (analyzer, calls) = slow_analyzer(config, Duration::ZERO);
    analyzer.analyze(VAULT, "vault");
    analyzer.analyze(VAULT, "vault");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(analyzer.cache_stats().evictions >= 1);
}

#[test]
fn test_edit_during_analysis_keeps_only_latest_entry() {
    let (analyzer, calls) = slow_analyzer(AnalyzerConfig::default(), Duration::from_millis(150));
    let edited = format!("{} ", VAULT);

    let first = {
        let analyzer = Arc::clone(&analyzer);
        thread::spawn(move || analyzer.analyze(VAULT, "doc"))
    };
    thread::sleep(Duration::from_millis(30));
    analyzer.analyze(&edited, "doc");
    first.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(analyzer.cache_stats().entries, 1);

    // The latest text is still served from the cache
    analyzer.analyze(&edited, "doc");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
