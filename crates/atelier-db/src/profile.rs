//! The singleton profile and its history section.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::info;

use atelier_core::{
    BlobStore, Error, OwnerKind, Profile, ProfileHistoryEntry, ProfileRepository, Result,
    UpdateHistoryRequest, UpdateOutcome, UpdateProfileRequest,
};

use crate::content::{ContentKind, ContentPatch, ContentRepository, ContentSnapshot, Fields, Target};
use crate::transaction::TransactionGate;

pub struct ProfileKind;

impl ContentKind for ProfileKind {
    const OWNER: OwnerKind = OwnerKind::Profile;
    const TABLE: &'static str = "profile";
    const COLUMNS: &'static [&'static str] = &["name", "contact", "introduction"];
    const IMAGE_COLUMN: Option<&'static str> = Some("image");
    const HAS_ATTACHMENTS: bool = false;
}

fn profile_from_snapshot(mut snapshot: ContentSnapshot) -> Profile {
    Profile {
        image: snapshot.image,
        name: snapshot.fields.take("name"),
        contact: snapshot.fields.take("contact"),
        introduction: snapshot.fields.take("introduction"),
    }
}

fn history_from_row(row: &SqliteRow) -> Result<ProfileHistoryEntry> {
    Ok(ProfileHistoryEntry {
        id: row.try_get("id")?,
        category: row.try_get("category")?,
        duration: row.try_get("duration")?,
        content: row.try_get("content")?,
    })
}

/// SQLite profile repository.
#[derive(Clone)]
pub struct SqliteProfileRepository {
    pool: SqlitePool,
    gate: TransactionGate,
    content: ContentRepository<ProfileKind>,
}

impl SqliteProfileRepository {
    pub fn new(pool: SqlitePool, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            gate: TransactionGate::new(pool.clone()),
            content: ContentRepository::new(pool.clone(), blobs),
            pool,
        }
    }

    async fn apply_history_tx(
        tx: &mut Transaction<'_, Sqlite>,
        req: &UpdateHistoryRequest,
    ) -> Result<()> {
        if !req.remove_ids.is_empty() {
            let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM profile_history WHERE id IN (");
            let mut separated = qb.separated(", ");
            for id in &req.remove_ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            qb.build().execute(&mut **tx).await?;
        }

        for update in &req.updates {
            let updated = sqlx::query(
                "UPDATE profile_history SET category = ?, duration = ?, content = ? WHERE id = ?",
            )
            .bind(&update.content.category)
            .bind(&update.content.duration)
            .bind(&update.content.content)
            .bind(update.id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(Error::NotFound(format!("profile history {}", update.id)));
            }
        }

        for addition in &req.additions {
            sqlx::query("INSERT INTO profile_history (category, duration, content) VALUES (?, ?, ?)")
                .bind(&addition.category)
                .bind(&addition.duration)
                .bind(&addition.content)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn get(&self) -> Result<Profile> {
        Ok(self
            .content
            .find_singleton()
            .await?
            .map(profile_from_snapshot)
            .unwrap_or_default())
    }

    async fn update(&self, req: UpdateProfileRequest) -> Result<UpdateOutcome> {
        self.content
            .update(
                Target::Singleton,
                ContentPatch {
                    fields: Fields::new()
                        .with_some("name", req.name)
                        .with_some("contact", req.contact)
                        .with_some("introduction", req.introduction),
                    image: req.image,
                    remove_attachment_ids: None,
                    add_attachments: None,
                },
            )
            .await
    }

    async fn history(&self) -> Result<Vec<ProfileHistoryEntry>> {
        let rows = sqlx::query("SELECT id, category, duration, content FROM profile_history ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(history_from_row).collect()
    }

    /// Removals, then updates, then additions, all in one transaction.
    /// Updating an id that does not exist aborts the whole batch.
    async fn update_history(&self, req: UpdateHistoryRequest) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        let staged = Self::apply_history_tx(&mut tx, &req).await;
        TransactionGate::settle(tx, staged).await.into_result()?;

        info!(
            subsystem = "db",
            component = "profile",
            op = "update_history",
            removed = req.remove_ids.len(),
            updated = req.updates.len(),
            added = req.additions.len(),
            "Profile history updated"
        );
        Ok(())
    }
}
