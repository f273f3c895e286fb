//! Researcher resolution and dry-run planning.

mod common;

use orcid_sync::db::{cache_repo, institution_repo};
use orcid_sync::{Outcome, RebuildOptions, RecordKind};

use common::harness::ROR;
use common::{FakeRecord, TestHarness};

fn orcid(n: usize) -> String {
    format!("0000-0002-{:04}-{:04}", n / 10_000, n % 10_000)
}

fn dry_run() -> RebuildOptions {
    RebuildOptions {
        dry_run: true,
        ..TestHarness::options(RecordKind::all())
    }
}

#[tokio::test]
async fn test_pagination_collects_every_page() {
    let h = TestHarness::new();
    h.fake.affiliate_many(ROR, (0..250).map(orcid).collect());

    let report = h.rebuild(dry_run()).await;

    for entry in &report.entries {
        assert_eq!(entry.outcome, Outcome::Planned { researchers: 250 });
    }

    let searches = h.fake.search_requests();
    assert_eq!(searches.len(), 3);
    let pages: Vec<(&str, &str)> = searches
        .iter()
        .map(|r| (r.query_param("start").unwrap(), r.query_param("rows").unwrap()))
        .collect();
    assert_eq!(pages, vec![("0", "100"), ("100", "100"), ("200", "50")]);
}

#[tokio::test]
async fn test_duplicate_rows_are_collapsed() {
    let h = TestHarness::new();
    let mut ids: Vec<String> = (0..5).map(orcid).collect();
    ids.push(orcid(2));
    ids.push(orcid(0));
    h.fake.affiliate_many(ROR, ids);

    let report = h.rebuild(dry_run()).await;

    assert_eq!(
        report.entries[0].outcome,
        Outcome::Planned { researchers: 5 }
    );
}

#[tokio::test]
async fn test_result_window_caps_resolution() {
    let mut config = TestHarness::config();
    config.orcid.search_max_results = 150;
    let h = TestHarness::with_config(config);
    h.fake.affiliate_many(ROR, (0..400).map(orcid).collect());

    let report = h.rebuild(dry_run()).await;

    assert_eq!(
        report.entries[0].outcome,
        Outcome::Planned { researchers: 150 }
    );
    assert_eq!(h.fake.search_requests().len(), 2);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = TestHarness::new();
    h.register(ROR, "Example University");
    h.fake.set_grid_id(ROR, "grid.4709.a");
    h.fake.affiliate(ROR, &["0000-0003-0000-0001"]);
    h.fake.set_records(
        "0000-0003-0000-0001",
        RecordKind::Work,
        vec![FakeRecord::new(1, 1_700_000_000_000, "Untouched")],
    );

    let report = h.rebuild(dry_run()).await;

    assert_eq!(report.entries.len(), 2);
    for entry in &report.entries {
        assert_eq!(entry.outcome, Outcome::Planned { researchers: 1 });
        assert!(entry.run_id.is_none());
    }
    assert!(!report.has_failures());

    assert!(h.runs().is_empty());
    assert_eq!(cache_repo::count(&h.db, ROR, RecordKind::Work).unwrap(), 0);
    assert_eq!(cache_repo::count(&h.db, ROR, RecordKind::Funding).unwrap(), 0);
    let institution = institution_repo::find(&h.db, ROR).unwrap().unwrap();
    assert!(institution.grid_id.is_none());

    // One resolution per institution, no summary or detail traffic.
    assert_eq!(h.fake.search_requests().len(), 1);
    assert_eq!(
        h.fake
            .count_requests(|r| r.url.starts_with(common::fake_orcid::MEMBER_URL)),
        0
    );
}

#[tokio::test]
async fn test_dry_run_reports_resolver_failure() {
    let h = TestHarness::new();
    let search = format!("{}expanded-search/", common::fake_orcid::SEARCH_URL);
    h.fake.script(
        &search,
        Ok(orcid_sync::api::HttpResponse::new(400, "bad query")),
    );

    let report = h.rebuild(dry_run()).await;

    assert!(report
        .entries
        .iter()
        .all(|e| matches!(e.outcome, Outcome::Failed { .. })));
    assert!(report.has_failures());
    assert!(h.runs().is_empty());
}
