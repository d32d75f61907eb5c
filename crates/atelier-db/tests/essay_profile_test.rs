//! Essays (thumbnail plus body images) and the singleton profile.

use std::sync::Arc;

use atelier_db::test_fixtures::{image, FlakyBlobStore, TestStore, TEST_URI_PREFIX};
use atelier_db::{
    CreateEssayRequest, EssayRepository, Error, FilesystemBlobStore, HistoryContent, HistoryUpdate,
    Profile, ProfileRepository, UpdateEssayRequest, UpdateHistoryRequest, UpdateProfileRequest,
};
use tempfile::TempDir;

fn history(category: &str, duration: &str, content: &str) -> HistoryContent {
    HistoryContent {
        category: category.to_string(),
        duration: duration.to_string(),
        content: content.to_string(),
    }
}

async fn create_essay(store: &TestStore) -> i64 {
    store
        .db
        .essays
        .create(CreateEssayRequest {
            title: "On light".to_string(),
            body: "Morning first.".to_string(),
            thumbnail: image("cover.jpg"),
            images: vec![image("fig1.jpg")],
        })
        .await
        .expect("Failed to create essay")
}

// =============================================================================
// ESSAYS
// =============================================================================

#[tokio::test]
async fn test_essay_create_and_summaries() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    let id = create_essay(&store).await;

    let essay = store.db.essays.find(id).await.unwrap();
    assert_eq!(essay.title, "On light");
    assert_eq!(essay.body, "Morning first.");
    assert_eq!(essay.images.len(), 1);
    assert_eq!(essay.images[0].order, 0);
    let thumbnail = essay.thumbnail.clone().expect("thumbnail is set on create");
    assert_eq!(
        std::fs::read(store.path_of(&thumbnail)).unwrap(),
        b"bytes of cover.jpg"
    );

    let summaries = store.db.essays.list_summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, id);
    assert_eq!(summaries[0].thumbnail.as_deref(), Some(thumbnail.as_str()));
    assert_eq!(store.blob_files().len(), 2);
}

#[tokio::test]
async fn test_essay_thumbnail_replacement_purges_old_blob() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    let id = create_essay(&store).await;
    let old = store.db.essays.find(id).await.unwrap().thumbnail.unwrap();

    let outcome = store
        .db
        .essays
        .update(
            id,
            UpdateEssayRequest {
                thumbnail: Some(image("cover-v2.jpg")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.replaced_image.as_deref(), Some(old.as_str()));

    let essay = store.db.essays.find(id).await.unwrap();
    let new = essay.thumbnail.unwrap();
    assert_ne!(new, old);
    assert!(!store.path_of(&old).exists());
    assert!(store.path_of(&new).exists());
    assert_eq!(essay.body, "Morning first.", "untouched fields survive");
    assert_eq!(store.blob_files().len(), 2);
}

#[tokio::test]
async fn test_essay_body_update_leaves_blobs_alone() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    let id = create_essay(&store).await;
    let files_before = store.blob_files();

    let outcome = store
        .db
        .essays
        .update(
            id,
            UpdateEssayRequest {
                body: Some("Evening, later.".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome, Default::default());
    assert_eq!(store.db.essays.find(id).await.unwrap().body, "Evening, later.");
    assert_eq!(store.blob_files(), files_before);
}

#[tokio::test]
async fn test_essay_blob_failure_mid_update_purges_new_thumbnail() {
    let dir = TempDir::new().unwrap();
    let blob_dir = dir.path().join("images");
    let inner = Arc::new(FilesystemBlobStore::new(&blob_dir, TEST_URI_PREFIX).unwrap());
    let flaky = Arc::new(FlakyBlobStore::failing_after(inner, 2));
    let store = TestStore::with_blob_store(dir.path(), blob_dir, flaky.clone()).await;
    let id = create_essay(&store).await;
    let before = store.db.essays.find(id).await.unwrap();
    let files_before = store.blob_files();

    flaky.allow(1);
    let err = store
        .db
        .essays
        .update(
            id,
            UpdateEssayRequest {
                title: Some("Retitled".to_string()),
                thumbnail: Some(image("cover-v2.jpg")),
                add_images: Some(vec![image("fig2.jpg")]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
    assert_eq!(store.db.essays.find(id).await.unwrap(), before);
    assert_eq!(store.blob_files(), files_before);
}

#[tokio::test]
async fn test_essay_remove_purges_thumbnail_and_images() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    let id = create_essay(&store).await;

    let outcome = store.db.essays.remove(id).await.unwrap();
    assert_eq!(outcome.purged_uris.len(), 2);
    assert!(store.blob_files().is_empty());
    assert!(store.db.essays.find(id).await.unwrap_err().is_not_found());
    assert!(store.db.essays.list_summaries().await.unwrap().is_empty());
}

// =============================================================================
// PROFILE
// =============================================================================

#[tokio::test]
async fn test_profile_is_empty_before_first_update() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    assert_eq!(store.db.profile.get().await.unwrap(), Profile::default());
    assert!(store.db.profile.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_image_replaced_twice_keeps_only_latest_blob() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;

    let first = store
        .db
        .profile
        .update(UpdateProfileRequest {
            image: Some(image("me.jpg")),
            name: Some("Ada".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(first.replaced_image.is_none());
    let first_uri = store.db.profile.get().await.unwrap().image.unwrap();

    let second = store
        .db
        .profile
        .update(UpdateProfileRequest {
            image: Some(image("me-2.jpg")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(second.replaced_image.as_deref(), Some(first_uri.as_str()));

    let profile = store.db.profile.get().await.unwrap();
    let second_uri = profile.image.clone().unwrap();
    assert_eq!(profile.name.as_deref(), Some("Ada"));
    assert!(!store.path_of(&first_uri).exists());
    assert!(store.path_of(&second_uri).exists());
    assert_eq!(store.blob_files().len(), 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profile")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1, "profile stays a singleton");
}

#[tokio::test]
async fn test_profile_failed_update_purges_staged_image() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    store
        .db
        .profile
        .update(UpdateProfileRequest {
            image: Some(image("me.jpg")),
            contact: Some("ada@example.org".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let before = store.db.profile.get().await.unwrap();
    let files_before = store.blob_files();

    store.fail_updates_of("profile").await;
    let err = store
        .db
        .profile
        .update(UpdateProfileRequest {
            image: Some(image("me-2.jpg")),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));
    assert_eq!(store.db.profile.get().await.unwrap(), before);
    assert_eq!(store.blob_files(), files_before);
}

#[tokio::test]
async fn test_empty_profile_update_creates_blank_singleton() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    let outcome = store
        .db
        .profile
        .update(UpdateProfileRequest::default())
        .await
        .unwrap();
    assert_eq!(outcome, Default::default());
    assert_eq!(store.db.profile.get().await.unwrap(), Profile::default());
    assert!(store.blob_files().is_empty());
}

#[tokio::test]
async fn test_history_batch_applies_in_one_transaction() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    store
        .db
        .profile
        .update_history(UpdateHistoryRequest {
            additions: vec![
                history("education", "2010-2014", "Art school"),
                history("work", "2014-2020", "Studio assistant"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();
    let entries = store.db.profile.history().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].category, "education");

    store
        .db
        .profile
        .update_history(UpdateHistoryRequest {
            remove_ids: vec![entries[0].id],
            updates: vec![HistoryUpdate {
                id: entries[1].id,
                content: history("work", "2014-2021", "Lead assistant"),
            }],
            additions: vec![history("award", "2022", "Regional prize")],
        })
        .await
        .unwrap();

    let entries = store.db.profile.history().await.unwrap();
    let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["Lead assistant", "Regional prize"]);
    assert_eq!(entries[0].duration, "2014-2021");
}

#[tokio::test]
async fn test_history_update_of_missing_entry_aborts_batch() {
    let dir = TempDir::new().unwrap();
    let store = TestStore::in_dir(dir.path()).await;
    store
        .db
        .profile
        .update_history(UpdateHistoryRequest {
            additions: vec![history("work", "2014", "Studio assistant")],
            ..Default::default()
        })
        .await
        .unwrap();
    let before = store.db.profile.history().await.unwrap();

    let err = store
        .db
        .profile
        .update_history(UpdateHistoryRequest {
            remove_ids: vec![before[0].id],
            updates: vec![HistoryUpdate {
                id: 9_999,
                content: history("ghost", "-", "-"),
            }],
            additions: vec![history("award", "2022", "Regional prize")],
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.db.profile.history().await.unwrap(), before);
}
