//! Read-path E2E tests: hot-then-cold resolution over real tiers.

use pretty_assertions::assert_eq;

use e2e_tests::{months_ago, record_at, FlakyTier, TestHarness};
use tier_resolver::{ResolveError, Resolver};
use tier_types::{TierError, TierKind};

/// Hot copy wins, and the cold tier is not consulted.
#[tokio::test]
async fn test_hot_hit_returns_hot_copy() {
    let harness = TestHarness::new();
    let hot_copy = record_at("A1", months_ago(4)).with_field("amount", 1);
    let stale_cold_copy = record_at("A1", months_ago(4)).with_field("amount", 2);
    harness.write_hot(&[hot_copy.clone()]);
    harness.cold.put_record(&stale_cold_copy).unwrap();

    let cold = FlakyTier::new(harness.cold.clone());
    let resolver = Resolver::new(harness.hot.clone(), cold.clone());

    let resolution = resolver.resolve("A1").await.unwrap();
    assert_eq!(resolution.record, hot_copy);
    assert_eq!(resolution.source, TierKind::Hot);
    assert_eq!(cold.reads(), 0);
}

/// Hot miss falls back to the cold copy.
#[tokio::test]
async fn test_hot_miss_returns_cold_copy() {
    let harness = TestHarness::new();
    let b9 = record_at("B9", months_ago(8));
    harness.cold.put_record(&b9).unwrap();

    let resolution = harness.resolver().resolve("B9").await.unwrap();
    assert_eq!(resolution.record, b9);
    assert_eq!(resolution.source, TierKind::Cold);
}

/// Absent from both tiers.
#[tokio::test]
async fn test_missing_everywhere_is_not_found() {
    let harness = TestHarness::new();

    let err = harness.resolver().get_record("Z0").await.unwrap_err();
    assert_eq!(
        err,
        ResolveError::NotFound {
            id: "Z0".to_string()
        }
    );
}

/// A hot outage is reported as such, not turned into a cold lookup or a miss.
#[tokio::test]
async fn test_hot_outage_distinguishable_from_not_found() {
    let harness = TestHarness::new();
    harness.cold.put_record(&record_at("A1", months_ago(4))).unwrap();

    let hot = FlakyTier::new(harness.hot.clone());
    hot.fail_reads(TierError::transient("hot", "throttled"), 1);
    let cold = FlakyTier::new(harness.cold.clone());
    let resolver = Resolver::new(hot.clone(), cold.clone());

    let err = resolver.get_record("A1").await.unwrap_err();
    assert_eq!(err, ResolveError::Tier(TierError::transient("hot", "throttled")));
    assert!(!err.is_not_found());
    assert_eq!(cold.reads(), 0);

    // outage over: the record resolves from cold
    let record = resolver.get_record("A1").await.unwrap();
    assert_eq!(record.id, "A1");
}

/// Archived record stays readable through the resolver before and after
/// the hot copy would expire.
#[tokio::test]
async fn test_archived_record_resolvable() {
    let harness = TestHarness::new();
    let a1 = record_at("A1", months_ago(4));
    harness.write_hot(&[a1.clone()]);

    let mut worker = harness.worker(0, harness.archiver());
    worker.try_acquire().unwrap();
    worker.poll_once().await.unwrap();

    // hot still answers while its copy exists
    let resolution = harness.resolver().resolve("A1").await.unwrap();
    assert_eq!(resolution.source, TierKind::Hot);

    // resolve against a hot tier that no longer holds it
    let empty_hot = TestHarness::new();
    let resolver = Resolver::new(empty_hot.hot.clone(), harness.cold.clone());
    let resolution = resolver.resolve("A1").await.unwrap();
    assert_eq!(resolution.source, TierKind::Cold);
    assert_eq!(resolution.record, a1);
}

#[tokio::test]
async fn test_request_wrapper() {
    let harness = TestHarness::new();
    harness.write_hot(&[record_at("C1", months_ago(0))]);
    let resolver = harness.resolver();

    let record = resolver.handle_request(br#"{"id":"C1"}"#).await.unwrap();
    assert_eq!(record.id, "C1");

    let err = resolver.handle_request(br#"{"id":""}"#).await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidRequest(_)));
}
