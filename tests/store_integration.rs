//! Ingestion against the SQLite backend, driven through the library API.

use std::sync::Arc;

use csv_vault::db;
use csv_vault::hash::{HashAlgorithm, RowHasher};
use csv_vault::ingest::ingest;
use csv_vault::migrate::apply_schema;
use csv_vault::parse::parse_csv;
use csv_vault::query;
use csv_vault::sqlite_store::SqliteStore;
use csv_vault::store::Store;
use tempfile::TempDir;

async fn sqlite_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let pool = db::open(&tmp.path().join("vault.sqlite")).await.unwrap();
    apply_schema(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let (_tmp, store) = sqlite_store().await;
    let hasher = RowHasher::default();
    let rows = parse_csv("name,email\nJan,jan@x.com\nJan,jan@x.com\n").unwrap();

    let first = ingest(&store, &hasher, "people.csv", &rows).await.unwrap();
    assert_eq!((first.saved, first.duplicates, first.total), (1, 1, 2));

    let second = ingest(&store, &hasher, "people.csv", &rows).await.unwrap();
    assert_eq!((second.saved, second.duplicates, second.total), (0, 2, 2));

    assert_eq!(store.count_rows().await.unwrap(), 1);
    assert_eq!(store.count_files().await.unwrap(), 1);
}

#[tokio::test]
async fn test_cross_file_dedup_keeps_first_owner() {
    let (_tmp, store) = sqlite_store().await;
    let hasher = RowHasher::default();

    let a = parse_csv("name,email\nJan,jan@x.com\n").unwrap();
    let b = parse_csv("email,name\njan@x.com,Jan\nola@x.com,Ola\n").unwrap();

    ingest(&store, &hasher, "a.csv", &a).await.unwrap();
    let report = ingest(&store, &hasher, "b.csv", &b).await.unwrap();
    assert_eq!((report.saved, report.duplicates), (1, 1));

    let a_rows = query::list_by_file(&store, "a.csv").await.unwrap();
    let b_rows = query::list_by_file(&store, "b.csv").await.unwrap();
    assert_eq!(a_rows.len(), 1);
    assert_eq!(b_rows.len(), 1);
    assert_eq!(b_rows[0].data["name"], "Ola");

    // Column order of the stored row is preserved.
    let keys: Vec<&String> = a_rows[0].data.keys().collect();
    assert_eq!(keys, vec!["name", "email"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_keeps_hashes_unique() {
    let (_tmp, store) = sqlite_store().await;
    let store = Arc::new(store);
    let rows = Arc::new(
        parse_csv("sku,qty\nA-1,1\nA-2,2\nA-3,3\nA-4,4\nA-5,5\nA-6,6\nA-7,7\nA-8,8\n").unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..6 {
        let store = store.clone();
        let rows = rows.clone();
        handles.push(tokio::spawn(async move {
            let hasher = RowHasher::default();
            let name = format!("batch-{}.csv", i % 2);
            ingest(store.as_ref(), &hasher, &name, &rows).await.unwrap()
        }));
    }

    let mut saved = 0;
    let mut duplicates = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.total, 8);
        saved += report.saved;
        duplicates += report.duplicates;
    }

    assert_eq!(saved, 8);
    assert_eq!(duplicates, 6 * 8 - 8);
    assert_eq!(store.count_rows().await.unwrap(), 8);
    assert_eq!(store.count_files().await.unwrap(), 2);
}

#[tokio::test]
async fn test_sha256_fingerprints() {
    let (_tmp, store) = sqlite_store().await;
    let hasher = RowHasher::new(HashAlgorithm::Sha256);
    let rows = parse_csv("a,b\n1,2\n").unwrap();

    ingest(&store, &hasher, "s.csv", &rows).await.unwrap();
    let stored = query::list_all(&store).await.unwrap();
    assert_eq!(
        stored[0].hash,
        "21f76dfbfe6dfe21f762080ef484112cf2952974cef30741fd1931e1c6d92112"
    );
}

#[tokio::test]
async fn test_search_and_stats_on_sqlite() {
    let (_tmp, store) = sqlite_store().await;
    let hasher = RowHasher::default();

    let rows = parse_csv("name,city\nAnna Nowak,Kraków\nPiotr,Gdańsk\n").unwrap();
    ingest(&store, &hasher, "team.csv", &rows).await.unwrap();

    let hits = query::search(&store, "anna", Some("name")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(query::search(&store, "zzz", None).await.unwrap().is_empty());

    let stats = query::stats(&store).await.unwrap();
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.latest_file.unwrap().filename, "team.csv");
}
