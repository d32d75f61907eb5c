//! Attachment index: ordered image references per content entity.
//!
//! One shared table keyed by `(owner_kind, owner_id)`. Writes only happen
//! inside the owning entity's transaction, so every mutating method takes
//! the transaction explicitly. Reads come in pooled and transactional forms.

use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use atelier_core::{AttachmentRecord, OwnerKind, Result};

/// Order reported for rows inserted but not yet resequenced.
pub const UNSEQUENCED: i64 = -1;

const SELECT_ATTACHMENT: &str =
    "SELECT id, owner_kind, owner_id, blob_uri, sort_order FROM attachment";

/// Stable display order: sequenced rows first, insertion id as tie-break.
const ORDER_BY: &str = " ORDER BY sort_order IS NULL, sort_order, id";

fn attachment_from_row(row: &SqliteRow) -> Result<AttachmentRecord> {
    let kind: String = row.try_get("owner_kind")?;
    Ok(AttachmentRecord {
        id: row.try_get("id")?,
        owner_kind: kind.parse()?,
        owner_id: row.try_get("owner_id")?,
        blob_uri: row.try_get("blob_uri")?,
        order: row
            .try_get::<Option<i64>, _>("sort_order")?
            .unwrap_or(UNSEQUENCED),
    })
}

/// SQLite attachment index.
#[derive(Clone)]
pub struct SqliteAttachmentIndex {
    pool: SqlitePool,
}

impl SqliteAttachmentIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn list_with<'e, E>(executor: E, kind: OwnerKind, owner_id: i64) -> Result<Vec<AttachmentRecord>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!("{SELECT_ATTACHMENT} WHERE owner_kind = ? AND owner_id = ?{ORDER_BY}");
        let rows = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(owner_id)
            .fetch_all(executor)
            .await?;
        rows.iter().map(attachment_from_row).collect()
    }

    async fn find_by_path_with<'e, E>(
        executor: E,
        kind: OwnerKind,
        owner_id: i64,
        blob_uri: &str,
    ) -> Result<Option<AttachmentRecord>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "{SELECT_ATTACHMENT} WHERE owner_kind = ? AND owner_id = ? AND blob_uri = ? ORDER BY id LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(owner_id)
            .bind(blob_uri)
            .fetch_optional(executor)
            .await?;
        row.as_ref().map(attachment_from_row).transpose()
    }

    async fn find_by_ids_with<'e, E>(
        executor: E,
        kind: OwnerKind,
        owner_id: i64,
        ids: &[i64],
    ) -> Result<Vec<AttachmentRecord>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_ATTACHMENT);
        qb.push(" WHERE owner_kind = ");
        qb.push_bind(kind.as_str());
        qb.push(" AND owner_id = ");
        qb.push_bind(owner_id);
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        qb.push(ORDER_BY);

        let rows = qb.build().fetch_all(executor).await?;
        rows.iter().map(attachment_from_row).collect()
    }

    /// Attachments of one entity in display order.
    pub async fn list(&self, kind: OwnerKind, owner_id: i64) -> Result<Vec<AttachmentRecord>> {
        Self::list_with(&self.pool, kind, owner_id).await
    }

    /// Transactional form of [`Self::list`].
    pub async fn list_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OwnerKind,
        owner_id: i64,
    ) -> Result<Vec<AttachmentRecord>> {
        Self::list_with(&mut **tx, kind, owner_id).await
    }

    /// Every attachment of a kind, grouped by owner then display order.
    pub async fn list_kind(&self, kind: OwnerKind) -> Result<Vec<AttachmentRecord>> {
        let sql = format!(
            "{SELECT_ATTACHMENT} WHERE owner_kind = ? ORDER BY owner_id, sort_order IS NULL, sort_order, id"
        );
        let rows = sqlx::query(&sql)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(attachment_from_row).collect()
    }

    pub async fn find_by_path(
        &self,
        kind: OwnerKind,
        owner_id: i64,
        blob_uri: &str,
    ) -> Result<Option<AttachmentRecord>> {
        Self::find_by_path_with(&self.pool, kind, owner_id, blob_uri).await
    }

    pub async fn find_by_path_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OwnerKind,
        owner_id: i64,
        blob_uri: &str,
    ) -> Result<Option<AttachmentRecord>> {
        Self::find_by_path_with(&mut **tx, kind, owner_id, blob_uri).await
    }

    /// Records among `ids` that belong to the entity. Foreign ids drop out.
    pub async fn find_by_ids(
        &self,
        kind: OwnerKind,
        owner_id: i64,
        ids: &[i64],
    ) -> Result<Vec<AttachmentRecord>> {
        Self::find_by_ids_with(&self.pool, kind, owner_id, ids).await
    }

    pub async fn find_by_ids_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OwnerKind,
        owner_id: i64,
        ids: &[i64],
    ) -> Result<Vec<AttachmentRecord>> {
        Self::find_by_ids_with(&mut **tx, kind, owner_id, ids).await
    }

    /// Insert one unsequenced row per uri, in the given order.
    pub async fn add_many_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OwnerKind,
        owner_id: i64,
        uris: &[String],
    ) -> Result<u64> {
        if uris.is_empty() {
            return Ok(0);
        }
        let mut qb =
            QueryBuilder::<Sqlite>::new("INSERT INTO attachment (owner_kind, owner_id, blob_uri) ");
        qb.push_values(uris, |mut row, uri| {
            row.push_bind(kind.as_str())
                .push_bind(owner_id)
                .push_bind(uri.clone());
        });
        let inserted = qb.build().execute(&mut **tx).await?.rows_affected();

        debug!(
            subsystem = "db",
            component = "attachments",
            op = "add_many",
            owner_kind = %kind,
            owner_id,
            row_count = inserted,
            "Attachments inserted"
        );
        Ok(inserted)
    }

    /// Delete the entity's rows whose id is in `ids`; other ids are ignored.
    pub async fn remove_by_ids_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OwnerKind,
        owner_id: i64,
        ids: &[i64],
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM attachment WHERE owner_kind = ");
        qb.push_bind(kind.as_str());
        qb.push(" AND owner_id = ");
        qb.push_bind(owner_id);
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let removed = qb.build().execute(&mut **tx).await?.rows_affected();
        debug!(
            subsystem = "db",
            component = "attachments",
            op = "remove_by_ids",
            owner_kind = %kind,
            owner_id,
            row_count = removed,
            "Attachments removed"
        );
        Ok(removed)
    }

    /// Delete every row of the entity.
    pub async fn remove_all_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OwnerKind,
        owner_id: i64,
    ) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM attachment WHERE owner_kind = ? AND owner_id = ?")
            .bind(kind.as_str())
            .bind(owner_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        Ok(removed)
    }

    /// Rewrite `sort_order` to `0..n-1` by ascending insertion id.
    ///
    /// A single statement: each row's order is the count of surviving rows
    /// with a smaller id in the same partition.
    pub async fn resequence_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: OwnerKind,
        owner_id: i64,
    ) -> Result<u64> {
        let updated = sqlx::query(
            r#"
            UPDATE attachment
            SET sort_order = (
                SELECT COUNT(*) FROM attachment AS earlier
                WHERE earlier.owner_kind = attachment.owner_kind
                  AND earlier.owner_id = attachment.owner_id
                  AND earlier.id < attachment.id
            )
            WHERE owner_kind = ? AND owner_id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(owner_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        debug!(
            subsystem = "db",
            component = "attachments",
            op = "resequence",
            owner_kind = %kind,
            owner_id,
            row_count = updated,
            "Attachments resequenced"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::create_pool;
    use crate::run_migrations;

    async fn index() -> (SqlitePool, SqliteAttachmentIndex) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        (pool.clone(), SqliteAttachmentIndex::new(pool))
    }

    fn uris(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("/images/{n}")).collect()
    }

    #[tokio::test]
    async fn test_add_then_resequence_is_dense() {
        let (pool, index) = index().await;
        let mut tx = pool.begin().await.unwrap();
        index
            .add_many_tx(&mut tx, OwnerKind::Portfolio, 1, &uris(&["a", "b", "c"]))
            .await
            .unwrap();
        let unsequenced = index.list_tx(&mut tx, OwnerKind::Portfolio, 1).await.unwrap();
        assert!(unsequenced.iter().all(|r| r.order == UNSEQUENCED));

        index
            .resequence_tx(&mut tx, OwnerKind::Portfolio, 1)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = index.list(OwnerKind::Portfolio, 1).await.unwrap();
        let orders: Vec<i64> = rows.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        let names: Vec<&str> = rows.iter().map(|r| r.blob_uri.as_str()).collect();
        assert_eq!(names, vec!["/images/a", "/images/b", "/images/c"]);
    }

    #[tokio::test]
    async fn test_remove_ignores_foreign_ids_and_resequence_closes_gaps() {
        let (pool, index) = index().await;
        let mut tx = pool.begin().await.unwrap();
        index
            .add_many_tx(&mut tx, OwnerKind::Essay, 1, &uris(&["a", "b", "c"]))
            .await
            .unwrap();
        index
            .add_many_tx(&mut tx, OwnerKind::Portfolio, 1, &uris(&["x"]))
            .await
            .unwrap();
        let essay_rows = index.list_tx(&mut tx, OwnerKind::Essay, 1).await.unwrap();
        let portfolio_rows = index.list_tx(&mut tx, OwnerKind::Portfolio, 1).await.unwrap();

        // First essay row plus a row owned by a different kind.
        let removed = index
            .remove_by_ids_tx(
                &mut tx,
                OwnerKind::Essay,
                1,
                &[essay_rows[0].id, portfolio_rows[0].id, 9_999],
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);
        index.resequence_tx(&mut tx, OwnerKind::Essay, 1).await.unwrap();
        tx.commit().await.unwrap();

        let rows = index.list(OwnerKind::Essay, 1).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].blob_uri, "/images/b");
        assert_eq!(rows[0].order, 0);
        assert_eq!(rows[1].order, 1);
        assert_eq!(index.list(OwnerKind::Portfolio, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_path_and_ids() {
        let (pool, index) = index().await;
        let mut tx = pool.begin().await.unwrap();
        index
            .add_many_tx(&mut tx, OwnerKind::Portfolio, 4, &uris(&["a", "b"]))
            .await
            .unwrap();
        index.resequence_tx(&mut tx, OwnerKind::Portfolio, 4).await.unwrap();
        tx.commit().await.unwrap();

        let b = index
            .find_by_path(OwnerKind::Portfolio, 4, "/images/b")
            .await
            .unwrap()
            .expect("b should be indexed");
        assert_eq!(b.order, 1);
        assert!(index
            .find_by_path(OwnerKind::Portfolio, 5, "/images/b")
            .await
            .unwrap()
            .is_none());

        let found = index
            .find_by_ids(OwnerKind::Portfolio, 4, &[b.id, b.id + 100])
            .await
            .unwrap();
        assert_eq!(found, vec![b]);
        assert!(index
            .find_by_ids(OwnerKind::Portfolio, 4, &[])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_remove_all_and_list_kind() {
        let (pool, index) = index().await;
        let mut tx = pool.begin().await.unwrap();
        for owner in [1, 2] {
            index
                .add_many_tx(&mut tx, OwnerKind::Portfolio, owner, &uris(&["a", "b"]))
                .await
                .unwrap();
            index
                .resequence_tx(&mut tx, OwnerKind::Portfolio, owner)
                .await
                .unwrap();
        }
        let removed = index
            .remove_all_tx(&mut tx, OwnerKind::Portfolio, 1)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        tx.commit().await.unwrap();

        let all = index.list_kind(OwnerKind::Portfolio).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.owner_id == 2));
    }

    #[tokio::test]
    async fn test_rolled_back_writes_are_invisible() {
        let (pool, index) = index().await;
        let mut tx = pool.begin().await.unwrap();
        index
            .add_many_tx(&mut tx, OwnerKind::Portfolio, 1, &uris(&["a"]))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert!(index.list(OwnerKind::Portfolio, 1).await.unwrap().is_empty());
    }
}
