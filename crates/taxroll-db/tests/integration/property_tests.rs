use taxroll_core::models::{ImprovementDetail, PersistOutcome};
use taxroll_core::testutil::make_test_record;
use taxroll_core::traits::PropertyStore;

use crate::integration::common::{ALL_TABLES, count_rows, setup_test_db};

#[tokio::test]
async fn persist_and_load_full_record() {
    let (db, _container) = setup_test_db().await;
    let repo = db.property_repo();
    let record = make_test_record(2290);

    assert!(!repo.exists(2290).await.unwrap());
    let outcome = repo.persist(&record).await.unwrap();
    assert_eq!(outcome, PersistOutcome::Inserted);
    assert!(repo.exists(2290).await.unwrap());

    let loaded = repo
        .get(2290)
        .await
        .unwrap()
        .expect("Should find the property");
    assert_eq!(loaded, record);

    assert_eq!(count_rows(&db, "roll_values").await, 2);
    assert_eq!(count_rows(&db, "jurisdictions").await, 1);
    assert_eq!(count_rows(&db, "improvements").await, 1);
    assert_eq!(count_rows(&db, "improvement_details").await, 1);
    assert_eq!(count_rows(&db, "land").await, 1);
}

#[tokio::test]
async fn get_missing_property_returns_none() {
    let (db, _container) = setup_test_db().await;
    assert!(db.property_repo().get(404).await.unwrap().is_none());
}

#[tokio::test]
async fn second_persist_is_duplicate_and_writes_nothing() {
    let (db, _container) = setup_test_db().await;
    let repo = db.property_repo();

    repo.persist(&make_test_record(7)).await.unwrap();
    let mut changed = make_test_record(7);
    changed.owner_name = "SOMEONE ELSE".into();
    let outcome = repo.persist(&changed).await.unwrap();

    assert_eq!(outcome, PersistOutcome::Duplicate);
    assert_eq!(count_rows(&db, "properties").await, 1);
    assert_eq!(count_rows(&db, "roll_values").await, 2);
    assert_eq!(
        repo.get(7).await.unwrap().unwrap().owner_name,
        "SMITH JOHN"
    );
}

#[tokio::test]
async fn failed_detail_insert_rolls_back_everything() {
    let (db, _container) = setup_test_db().await;
    sqlx::query(
        "ALTER TABLE improvement_details ADD CONSTRAINT reject_marker CHECK (description <> 'REJECT')",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let mut record = make_test_record(31);
    record.improvements[0].details.push(ImprovementDetail {
        description: "REJECT".into(),
        ..ImprovementDetail::default()
    });

    let err = db.property_repo().persist(&record).await.unwrap_err();
    assert_eq!(err.kind(), "persistence_error");

    for table in ALL_TABLES {
        assert_eq!(count_rows(&db, table).await, 0, "{table} should be empty");
    }
}

#[tokio::test]
async fn repeated_roll_year_fails_instead_of_dropping_a_row() {
    let (db, _container) = setup_test_db().await;
    let mut record = make_test_record(32);
    let mut repeated = record.roll_values[0].clone();
    repeated.assessed = Some(1);
    record.roll_values.push(repeated);

    let err = db.property_repo().persist(&record).await.unwrap_err();
    assert_eq!(err.kind(), "persistence_error");

    for table in ALL_TABLES {
        assert_eq!(count_rows(&db, table).await, 0, "{table} should be empty");
    }
}

#[tokio::test]
async fn concurrent_inserts_of_same_property_store_one_copy() {
    let (db, _container) = setup_test_db().await;
    let repo = db.property_repo();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.persist(&make_test_record(55)).await })
        })
        .collect();

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == PersistOutcome::Inserted {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    assert_eq!(count_rows(&db, "properties").await, 1);
    assert_eq!(count_rows(&db, "improvements").await, 1);
}

#[tokio::test]
async fn store_trait_delegates_to_repository() {
    let (db, _container) = setup_test_db().await;
    let store = db.property_repo();

    assert!(!PropertyStore::exists(&store, 9).await.unwrap());
    PropertyStore::persist(&store, &make_test_record(9))
        .await
        .unwrap();
    assert!(PropertyStore::exists(&store, 9).await.unwrap());
    assert_eq!(store.count().await.unwrap(), 1);
    store.health_check().await.unwrap();
}
