//! User store and startup wiring.

use atelier_db::test_fixtures::TestStore;
use atelier_db::{password_digest, Database, Error, StorageConfig, UserRepository};
use tempfile::TempDir;

#[tokio::test]
async fn test_create_and_look_up_user() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;

    let id = store.db.users.create("admin", "s3cret").await.unwrap();
    let user = store.db.users.find(id).await.unwrap();
    assert_eq!(user.username, "admin");
    assert_eq!(user.password_digest, password_digest("s3cret"));
    assert!(user.refresh_token.is_none());

    assert_eq!(store.db.users.find_by_username("admin").await.unwrap().id, id);
    assert!(store.db.users.exists("admin").await.unwrap());
    assert!(!store.db.users.exists("guest").await.unwrap());
}

#[tokio::test]
async fn test_duplicate_username_is_invalid_input() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    store.db.users.create("admin", "one").await.unwrap();

    let err = store
        .db
        .users
        .create_with_digest("admin", &password_digest("two"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");
}

#[tokio::test]
async fn test_refresh_token_set_and_clear() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    let id = store.db.users.create("admin", "pw").await.unwrap();

    store.db.users.set_refresh_token(id, "token-1").await.unwrap();
    assert_eq!(
        store.db.users.find(id).await.unwrap().refresh_token.as_deref(),
        Some("token-1")
    );

    store.db.users.clear_refresh_token(id).await.unwrap();
    assert!(store.db.users.find(id).await.unwrap().refresh_token.is_none());
}

#[tokio::test]
async fn test_missing_user_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;

    assert!(store.db.users.find(7).await.unwrap_err().is_not_found());
    assert!(store
        .db
        .users
        .find_by_username("nobody")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .db
        .users
        .set_refresh_token(7, "t")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_connect_prepares_database_and_blob_dir() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        database_url: format!("sqlite://{}", dir.path().join("app.db").display()),
        image_dir: dir.path().join("assets").join("images"),
        image_uri_prefix: "/images".to_string(),
        max_connections: 2,
    };

    let db = Database::connect(&config).await.expect("connect should succeed");
    assert!(config.image_dir.is_dir());
    db.migrate().await.expect("migrations are idempotent");
    assert!(!db.users.exists("admin").await.unwrap());
}

#[tokio::test]
async fn test_connect_rejects_unwritable_blob_dir() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let config = StorageConfig {
        database_url: format!("sqlite://{}", dir.path().join("app.db").display()),
        image_dir: blocker.join("images"),
        ..StorageConfig::default()
    };

    let err = Database::connect(&config).await.err().expect("connect must fail");
    assert!(matches!(err, Error::Config(_) | Error::Io(_)), "got {err:?}");
}
