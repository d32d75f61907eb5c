//! Essays: title, body, a thumbnail and inline images.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use atelier_core::{
    BlobStore, CreateEssayRequest, Error, Essay, EssayRepository, EssaySummary, OwnerKind,
    RemoveOutcome, Result, UpdateEssayRequest, UpdateOutcome,
};

use crate::content::{ContentKind, ContentPatch, ContentRepository, ContentSnapshot, Fields, NewContent, Target};

pub struct EssayKind;

impl ContentKind for EssayKind {
    const OWNER: OwnerKind = OwnerKind::Essay;
    const TABLE: &'static str = "essay";
    const COLUMNS: &'static [&'static str] = &["title", "body"];
    const IMAGE_COLUMN: Option<&'static str> = Some("thumbnail");
    const HAS_ATTACHMENTS: bool = true;
}

fn title_of(snapshot: &mut ContentSnapshot) -> Result<String> {
    snapshot
        .fields
        .take("title")
        .ok_or_else(|| Error::Internal(format!("essay {} has no title", snapshot.id)))
}

fn essay_from_snapshot(mut snapshot: ContentSnapshot) -> Result<Essay> {
    let title = title_of(&mut snapshot)?;
    Ok(Essay {
        id: snapshot.id,
        title,
        thumbnail: snapshot.image,
        body: snapshot.fields.take("body").unwrap_or_default(),
        images: snapshot.attachments,
    })
}

fn summary_from_snapshot(mut snapshot: ContentSnapshot) -> Result<EssaySummary> {
    let title = title_of(&mut snapshot)?;
    Ok(EssaySummary {
        id: snapshot.id,
        title,
        thumbnail: snapshot.image,
    })
}

/// SQLite essay repository.
#[derive(Clone)]
pub struct SqliteEssayRepository {
    content: ContentRepository<EssayKind>,
}

impl SqliteEssayRepository {
    pub fn new(pool: SqlitePool, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            content: ContentRepository::new(pool, blobs),
        }
    }
}

#[async_trait]
impl EssayRepository for SqliteEssayRepository {
    async fn create(&self, req: CreateEssayRequest) -> Result<i64> {
        self.content
            .create(NewContent {
                fields: Fields::new()
                    .with("title", req.title)
                    .with("body", req.body),
                image: Some(req.thumbnail),
                attachments: req.images,
            })
            .await
    }

    async fn find(&self, id: i64) -> Result<Essay> {
        essay_from_snapshot(self.content.find(id).await?)
    }

    async fn list_summaries(&self) -> Result<Vec<EssaySummary>> {
        self.content
            .list_rows()
            .await?
            .into_iter()
            .map(summary_from_snapshot)
            .collect()
    }

    async fn update(&self, id: i64, req: UpdateEssayRequest) -> Result<UpdateOutcome> {
        self.content
            .update(
                Target::Id(id),
                ContentPatch {
                    fields: Fields::new()
                        .with_some("title", req.title)
                        .with_some("body", req.body),
                    image: req.thumbnail,
                    remove_attachment_ids: req.remove_image_ids,
                    add_attachments: req.add_images,
                },
            )
            .await
    }

    async fn remove(&self, id: i64) -> Result<RemoveOutcome> {
        self.content.remove(id).await
    }
}
