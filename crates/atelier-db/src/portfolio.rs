//! Portfolio entries: a title and an ordered gallery.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use atelier_core::{
    BlobStore, CreatePortfolioRequest, Error, OwnerKind, Portfolio, PortfolioRepository,
    RemoveOutcome, Result, UpdateOutcome, UpdatePortfolioRequest,
};

use crate::content::{ContentKind, ContentPatch, ContentRepository, ContentSnapshot, Fields, NewContent, Target};

pub struct PortfolioKind;

impl ContentKind for PortfolioKind {
    const OWNER: OwnerKind = OwnerKind::Portfolio;
    const TABLE: &'static str = "portfolio";
    const COLUMNS: &'static [&'static str] = &["title"];
    const IMAGE_COLUMN: Option<&'static str> = None;
    const HAS_ATTACHMENTS: bool = true;
}

fn portfolio_from_snapshot(mut snapshot: ContentSnapshot) -> Result<Portfolio> {
    let title = snapshot
        .fields
        .take("title")
        .ok_or_else(|| Error::Internal(format!("portfolio {} has no title", snapshot.id)))?;
    Ok(Portfolio {
        id: snapshot.id,
        title,
        images: snapshot.attachments,
    })
}

/// SQLite portfolio repository.
#[derive(Clone)]
pub struct SqlitePortfolioRepository {
    content: ContentRepository<PortfolioKind>,
}

impl SqlitePortfolioRepository {
    pub fn new(pool: SqlitePool, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            content: ContentRepository::new(pool, blobs),
        }
    }
}

#[async_trait]
impl PortfolioRepository for SqlitePortfolioRepository {
    async fn create(&self, req: CreatePortfolioRequest) -> Result<i64> {
        self.content
            .create(NewContent {
                fields: Fields::new().with("title", req.title),
                image: None,
                attachments: req.images,
            })
            .await
    }

    async fn find(&self, id: i64) -> Result<Portfolio> {
        portfolio_from_snapshot(self.content.find(id).await?)
    }

    async fn list(&self) -> Result<Vec<Portfolio>> {
        self.content
            .list()
            .await?
            .into_iter()
            .map(portfolio_from_snapshot)
            .collect()
    }

    async fn update(&self, id: i64, req: UpdatePortfolioRequest) -> Result<UpdateOutcome> {
        self.content
            .update(
                Target::Id(id),
                ContentPatch {
                    fields: Fields::new().with_some("title", req.title),
                    image: None,
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
