use std::collections::HashSet;

use taxroll_core::error::AppError;
use taxroll_core::traits::ProxyPool;

use crate::integration::common::setup_test_db;

fn ips(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("10.1.0.{i}:8080")).collect()
}

#[tokio::test]
async fn load_ignores_known_proxies() {
    let (db, _container) = setup_test_db().await;
    let repo = db.proxy_repo();

    assert_eq!(repo.load(&ips(3)).await.unwrap(), 3);
    assert_eq!(repo.load(&ips(4)).await.unwrap(), 1);

    let listed = repo.list().await.unwrap();
    assert_eq!(listed.len(), 4);
    assert!(listed.iter().all(|p| p.uses == 0 && !p.is_bad && p.last_used.is_none()));
}

#[tokio::test]
async fn selection_rotates_least_recently_used() {
    let (db, _container) = setup_test_db().await;
    let repo = db.proxy_repo();
    repo.load(&ips(3)).await.unwrap();

    let first: Vec<String> = {
        let mut picked = Vec::new();
        for _ in 0..3 {
            picked.push(repo.select_next().await.unwrap().ip);
        }
        picked
    };
    assert_eq!(first.iter().collect::<HashSet<_>>().len(), 3);

    // The fourth pick wraps around to the oldest stamp.
    let fourth = repo.select_next().await.unwrap();
    assert_eq!(fourth.ip, first[0]);
    assert_eq!(fourth.uses, 2);
    assert!(fourth.last_used.is_some());
}

#[tokio::test]
async fn concurrent_selection_never_hands_out_the_same_proxy() {
    let (db, _container) = setup_test_db().await;
    let repo = db.proxy_repo();
    repo.load(&ips(8)).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.select_next().await })
        })
        .collect();

    let mut picked = HashSet::new();
    for handle in handles {
        let proxy = handle.await.unwrap().unwrap();
        assert_eq!(proxy.uses, 1);
        picked.insert(proxy.ip);
    }
    assert_eq!(picked.len(), 8);

    let total_uses: i64 = repo.list().await.unwrap().iter().map(|p| p.uses).sum();
    assert_eq!(total_uses, 8);
}

#[tokio::test]
async fn contention_never_reports_exhaustion_while_proxies_are_usable() {
    let (db, _container) = setup_test_db().await;
    let repo = db.proxy_repo();
    repo.load(&ips(2)).await.unwrap();

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.select_next().await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let listed = repo.list().await.unwrap();
    let total_uses: i64 = listed.iter().map(|p| p.uses).sum();
    assert_eq!(total_uses, 40);
    // Strict rotation: both proxies were claimed equally often.
    assert!(listed.iter().all(|p| p.uses == 20));
}

#[tokio::test]
async fn single_proxy_serves_every_concurrent_claim() {
    let (db, _container) = setup_test_db().await;
    let repo = db.proxy_repo();
    repo.load(&ips(1)).await.unwrap();

    for _ in 0..5 {
        let handles: Vec<_> = (0..40)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.select_next().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().ip, "10.1.0.0:8080");
        }
    }

    assert_eq!(repo.list().await.unwrap()[0].uses, 200);
}

#[tokio::test]
async fn equal_last_used_prefers_fewer_uses() {
    let (db, _container) = setup_test_db().await;
    sqlx::query(
        r#"
        INSERT INTO proxies (ip, last_used, uses) VALUES
            ('10.4.0.1:8080', '2024-01-01T00:00:00Z', 5),
            ('10.4.0.2:8080', '2024-01-01T00:00:00Z', 2)
        "#,
    )
    .execute(db.pool())
    .await
    .unwrap();

    let picked = db.proxy_repo().select_next().await.unwrap();
    assert_eq!(picked.ip, "10.4.0.2:8080");
    assert_eq!(picked.uses, 3);
}

#[tokio::test]
async fn bad_proxies_are_skipped_until_reset() {
    let (db, _container) = setup_test_db().await;
    let repo = db.proxy_repo();
    repo.load(&ips(2)).await.unwrap();

    repo.mark_bad("10.1.0.0:8080").await.unwrap();
    for _ in 0..3 {
        assert_eq!(repo.select_next().await.unwrap().ip, "10.1.0.1:8080");
    }

    repo.mark_bad("10.1.0.1:8080").await.unwrap();
    assert_eq!(repo.select_next().await, Err(AppError::ProxyExhaustion));

    assert_eq!(repo.reset_bad().await.unwrap(), 2);
    assert_eq!(repo.select_next().await.unwrap().ip, "10.1.0.0:8080");
}

#[tokio::test]
async fn empty_pool_is_exhausted() {
    let (db, _container) = setup_test_db().await;
    let pool = db.proxy_repo();

    assert_eq!(
        ProxyPool::select_next(&pool).await,
        Err(AppError::ProxyExhaustion)
    );
    // Unknown proxies can be marked without error.
    ProxyPool::mark_bad(&pool, "192.0.2.1:3128").await.unwrap();
}
