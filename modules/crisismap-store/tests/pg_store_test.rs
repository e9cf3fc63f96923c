//! Integration tests for PgStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::Utc;
use crisismap_common::{VoteCounts, VoteType, NOWHERE};
use crisismap_store::{
    CatalogEntryRecord, CatalogFilter, CrowdReportRecord, CrowdVoteRecord, Datastore, MapRecord,
    NewAuditEvent, PgSearchIndex, PgStore, ReportQuery, ScoreMutation, SearchIndex,
};
use sqlx::PgPool;

/// Get a migrated, empty test store, or skip if no test DB is available.
async fn test_store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    let store = PgStore::new(pool);
    store.migrate().await.ok()?;

    // Clean slate for each test
    sqlx::query(
        "TRUNCATE maps, map_versions, catalog_entries, crowd_reports, crowd_votes, \
         authorizations, domains, permission_grants, redirections, audit_events \
         RESTART IDENTITY CASCADE",
    )
    .execute(store.pool())
    .await
    .ok()?;

    Some(store)
}

fn report(id: &str, author: &str, topics: &[&str]) -> CrowdReportRecord {
    let now = Utc::now();
    CrowdReportRecord {
        id: id.to_string(),
        source: "http://src.example".into(),
        author: author.to_string(),
        effective: now,
        submitted: now,
        updated: now,
        text: "water on the road".into(),
        map_id: None,
        topic_ids: topics.iter().map(|t| t.to_string()).collect(),
        answers: serde_json::json!({"m.t.q": "yes"}),
        lat: NOWHERE.lat,
        lon: NOWHERE.lon,
        place_id: None,
        upvote_count: 0,
        downvote_count: 0,
        score: 0.0,
        hidden: false,
        reviewed: false,
    }
}

// =========================================================================
// Maps and versions
// =========================================================================

#[tokio::test]
async fn new_versions_advance_the_current_pointer() {
    let Some(store) = test_store().await else {
        return;
    };
    let map = MapRecord::new("m1", "xyz.com", "u1");

    let (map, first) = store
        .put_map_with_new_version(map, r#"{"title":"a"}"#.into(), "u1", Utc::now())
        .await
        .unwrap();
    let (map, second) = store
        .put_map_with_new_version(map, r#"{"title":"b"}"#.into(), "u1", Utc::now())
        .await
        .unwrap();

    assert_eq!(first.version_id, 1);
    assert_eq!(second.version_id, 2);
    let stored = store.get_map("m1").await.unwrap().unwrap();
    assert_eq!(stored.current_version_id, Some(2));
    assert_eq!(map.current_version_id, Some(2));

    let versions = store.list_map_versions("m1").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version_id, 2);
}

#[tokio::test]
async fn wipe_cascades_to_versions() {
    let Some(store) = test_store().await else {
        return;
    };
    let map = MapRecord::new("m1", "xyz.com", "u1");
    store
        .put_map_with_new_version(map, "{}".into(), "u1", Utc::now())
        .await
        .unwrap();

    store.wipe_map("m1").await.unwrap();

    assert!(store.get_map("m1").await.unwrap().is_none());
    assert!(store.get_map_version("m1", 1).await.unwrap().is_none());
}

// =========================================================================
// Catalog
// =========================================================================

#[tokio::test]
async fn catalog_listing_filters_listed_entries() {
    let Some(store) = test_store().await else {
        return;
    };
    let now = Utc::now();
    for (label, listed) in [("a", true), ("b", false)] {
        store
            .put_catalog_entry(&CatalogEntryRecord {
                domain: "xyz.com".into(),
                label: label.into(),
                created: now,
                creator_uid: "u1".into(),
                updated: now,
                updater_uid: "u1".into(),
                title: label.into(),
                publisher_name: None,
                map_id: "m1".into(),
                map_version_id: 1,
                is_listed: listed,
            })
            .await
            .unwrap();
    }

    let all = store
        .list_catalog_entries(&CatalogFilter {
            domain: Some("xyz.com".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let listed = store
        .list_catalog_entries(&CatalogFilter {
            domain: Some("xyz.com".into()),
            listed_only: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].label, "a");
    assert!(store.delete_catalog_entry("xyz.com", "a").await.unwrap());
    assert!(!store.delete_catalog_entry("xyz.com", "a").await.unwrap());
}

// =========================================================================
// Reports and votes
// =========================================================================

#[tokio::test]
async fn report_queries_match_any_topic() {
    let Some(store) = test_store().await else {
        return;
    };
    store
        .put_reports(&[
            report("http://src.example/.reports/1", "a1", &["m.x"]),
            report("http://src.example/.reports/2", "a2", &["m.y"]),
        ])
        .await
        .unwrap();

    let found = store
        .query_reports(&ReportQuery {
            topic_ids: Some(vec!["m.y".into(), "m.z".into()]),
            count: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].author, "a2");
}

#[tokio::test]
async fn modify_report_writes_through() {
    let Some(store) = test_store().await else {
        return;
    };
    let id = "http://src.example/.reports/1";
    store.put_report(&report(id, "a1", &[])).await.unwrap();

    let updated = store
        .modify_report(
            id,
            Box::new(|r| {
                r.score = -2.0;
                r.hidden = true;
            }),
        )
        .await
        .unwrap()
        .unwrap();

    assert!(updated.hidden);
    assert!(store.get_report(id).await.unwrap().unwrap().hidden);
    assert!(store
        .modify_report("missing", Box::new(|_| {}))
        .await
        .unwrap()
        .is_none());
}

fn up_down_score() -> ScoreMutation {
    Box::new(
        |r: &mut CrowdReportRecord, old: Option<&CrowdVoteRecord>, stored: VoteCounts| {
            let mut counts = stored;
            if let Some(old_type) = old.and_then(|v| v.vote_type.as_deref()) {
                if let Ok(old_type) = old_type.parse::<VoteType>() {
                    *counts.get_mut(old_type) -= 1;
                }
            }
            *counts.get_mut(VoteType::AnonymousUp) += 1;
            r.upvote_count = counts.upvotes();
            r.downvote_count = counts.downvotes();
            r.score = counts.score();
        },
    )
}

#[tokio::test]
async fn cast_vote_replaces_previous_vote() {
    let Some(store) = test_store().await else {
        return;
    };
    let id = "http://src.example/.reports/1";
    store.put_report(&report(id, "a1", &[])).await.unwrap();
    for vote_type in ["REVIEWER_DOWN", "ANONYMOUS_UP"] {
        let vote = CrowdVoteRecord {
            report_id: id.into(),
            voter: "v1".into(),
            vote_type: Some(vote_type.into()),
        };
        store.cast_vote(&vote, up_down_score()).await.unwrap().unwrap();
    }

    let stored = store.get_vote(id, "v1").await.unwrap().unwrap();
    assert_eq!(stored.vote_type.as_deref(), Some("ANONYMOUS_UP"));
    let report = store.get_report(id).await.unwrap().unwrap();
    assert_eq!((report.upvote_count, report.downvote_count), (1, 0));
}

#[tokio::test]
async fn concurrent_votes_are_all_counted() {
    let Some(store) = test_store().await else {
        return;
    };
    let id = "http://src.example/.reports/2";
    store.put_report(&report(id, "a1", &[])).await.unwrap();

    let casts = (0..8).map(|n| {
        let store = store.clone();
        tokio::spawn(async move {
            let vote = CrowdVoteRecord {
                report_id: id.into(),
                voter: format!("v{n}"),
                vote_type: Some("ANONYMOUS_UP".into()),
            };
            store.cast_vote(&vote, up_down_score()).await.unwrap();
        })
    });
    for cast in casts.collect::<Vec<_>>() {
        cast.await.unwrap();
    }

    let report = store.get_report(id).await.unwrap().unwrap();
    assert_eq!(report.upvote_count, 8);
    assert_eq!(report.score, 8.0);
}

#[tokio::test]
async fn search_index_reads_committed_reports() {
    let Some(store) = test_store().await else {
        return;
    };
    let index = PgSearchIndex::new(store.pool().clone());
    let mut located = report("http://src.example/.reports/3", "a1", &["m.roads"]);
    located.text = "Bridge closed by FLOOD".into();
    located.lat = 10.0;
    located.lon = 20.0;
    store.put_report(&located).await.unwrap();
    store
        .put_report(&report("http://src.example/.reports/4", "a2", &["m.shelter"]))
        .await
        .unwrap();

    let hits = |q: &'static str| {
        let index = index.clone();
        async move { index.search(q, 10).await.unwrap() }
    };
    assert_eq!(hits("flood bridge").await, vec![located.id.clone()]);
    assert_eq!(hits(r#"topic_id = "m.roads" hidden = False"#).await, vec![located.id.clone()]);
    assert_eq!(
        hits("distance(location, geopoint(10.0, 20.001)) < 200").await,
        vec![located.id.clone()]
    );
    assert_eq!(hits("NOT flood").await, vec!["http://src.example/.reports/4".to_string()]);
    assert_eq!(hits("").await.len(), 2);
    assert!(index.search("(flood", 10).await.is_err());
}

#[tokio::test]
async fn audit_events_get_sequence_numbers() {
    let Some(store) = test_store().await else {
        return;
    };
    let first = store
        .append_audit_event(NewAuditEvent::new("MAP_DELETED").with_map("m1"))
        .await
        .unwrap();
    let second = store
        .append_audit_event(NewAuditEvent::new("MAP_UNDELETED").with_map("m1"))
        .await
        .unwrap();

    assert!(second.seq > first.seq);
    let recent = store.list_audit_events(1).await.unwrap();
    assert_eq!(recent[0].event_type, "MAP_UNDELETED");
}
