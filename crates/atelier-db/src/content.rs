//! Generic content repository shared by every entity kind.
//!
//! A [`ContentKind`] describes one scalar table: its owner tag, its text
//! columns, an optional singleton image column, and whether it owns
//! attachments. [`ContentRepository`] turns that descriptor into the full
//! write protocol:
//!
//! 1. stage new blobs (singleton image first, then attachments),
//! 2. run every relational write in one gated transaction,
//! 3. on `Committed` purge blobs the transaction unlinked,
//!    on `Aborted` purge the blobs staged in step 1.
//!
//! Column names only ever come from the static descriptor. Every value is
//! a bound parameter.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};

use atelier_core::{
    AttachmentRecord, BlobStore, Error, ImagePayload, OwnerKind, RemoveOutcome, Result,
    UpdateOutcome,
};

use crate::attachments::SqliteAttachmentIndex;
use crate::ledger::BlobLedger;
use crate::transaction::{TransactionGate, TxOutcome};

/// Static description of one content table.
pub trait ContentKind: Send + Sync + 'static {
    /// Tag stored in the attachment index.
    const OWNER: OwnerKind;
    /// Scalar table name.
    const TABLE: &'static str;
    /// Writable text columns, excluding `id` and the image column.
    const COLUMNS: &'static [&'static str];
    /// Column holding a single image uri, if the kind has one.
    const IMAGE_COLUMN: Option<&'static str>;
    /// Whether the kind owns an ordered attachment list.
    const HAS_ATTACHMENTS: bool;
}

/// Column values for a write or read, keyed by static column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    values: Vec<(&'static str, Option<String>)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column`, replacing any earlier value.
    pub fn with(mut self, column: &'static str, value: impl Into<Option<String>>) -> Self {
        self.set(column, value.into());
        self
    }

    /// Set `column` only when a value is supplied. Used for partial updates.
    pub fn with_some(self, column: &'static str, value: Option<String>) -> Self {
        match value {
            Some(value) => self.with(column, value),
            None => self,
        }
    }

    fn set(&mut self, column: &'static str, value: Option<String>) {
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(c, _)| *c == column)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Remove and return a column's value.
    pub fn take(&mut self, column: &str) -> Option<String> {
        let index = self.values.iter().position(|(c, _)| *c == column)?;
        self.values.remove(index).1
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &(&'static str, Option<String>)> {
        self.values.iter()
    }

    fn validate<K: ContentKind>(&self) -> Result<()> {
        for (column, _) in &self.values {
            if !K::COLUMNS.contains(column) {
                return Err(Error::InvalidInput(format!(
                    "{} has no writable column {column}",
                    K::TABLE
                )));
            }
        }
        Ok(())
    }
}

/// Input for [`ContentRepository::create`].
#[derive(Debug, Clone, Default)]
pub struct NewContent {
    pub fields: Fields,
    pub image: Option<ImagePayload>,
    pub attachments: Vec<ImagePayload>,
}

/// Input for [`ContentRepository::update`]. `None` leaves a part untouched.
#[derive(Debug, Clone, Default)]
pub struct ContentPatch {
    pub fields: Fields,
    pub image: Option<ImagePayload>,
    pub remove_attachment_ids: Option<Vec<i64>>,
    pub add_attachments: Option<Vec<ImagePayload>>,
}

/// Which row an update addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Id(i64),
    /// The kind's only row, created by the update when absent.
    Singleton,
}

/// One entity as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub id: i64,
    pub fields: Fields,
    pub image: Option<String>,
    pub attachments: Vec<AttachmentRecord>,
}

/// Row identity and singleton image, read before a write begins.
struct Located {
    id: i64,
    image: Option<String>,
}

/// Create/find/list/update/remove for one [`ContentKind`].
pub struct ContentRepository<K: ContentKind> {
    pool: SqlitePool,
    index: SqliteAttachmentIndex,
    gate: TransactionGate,
    blobs: Arc<dyn BlobStore>,
    _kind: PhantomData<K>,
}

impl<K: ContentKind> Clone for ContentRepository<K> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            index: self.index.clone(),
            gate: self.gate.clone(),
            blobs: Arc::clone(&self.blobs),
            _kind: PhantomData,
        }
    }
}

fn select_sql<K: ContentKind>() -> String {
    let mut columns = vec!["id"];
    columns.extend_from_slice(K::COLUMNS);
    if let Some(image) = K::IMAGE_COLUMN {
        columns.push(image);
    }
    format!("SELECT {} FROM {}", columns.join(", "), K::TABLE)
}

fn snapshot_from_row<K: ContentKind>(row: &SqliteRow) -> Result<ContentSnapshot> {
    let mut fields = Fields::new();
    for &column in K::COLUMNS {
        fields.set(column, row.try_get::<Option<String>, _>(column)?);
    }
    let image = match K::IMAGE_COLUMN {
        Some(column) => row.try_get::<Option<String>, _>(column)?,
        None => None,
    };
    Ok(ContentSnapshot {
        id: row.try_get("id")?,
        fields,
        image,
        attachments: Vec::new(),
    })
}

fn not_found<K: ContentKind>(id: i64) -> Error {
    Error::NotFound(format!("{} {}", K::OWNER, id))
}

impl<K: ContentKind> ContentRepository<K> {
    pub fn new(pool: SqlitePool, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            index: SqliteAttachmentIndex::new(pool.clone()),
            gate: TransactionGate::new(pool.clone()),
            pool,
            blobs,
            _kind: PhantomData,
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    fn check_shape(&self, image: bool, attachments: bool) -> Result<()> {
        if image && K::IMAGE_COLUMN.is_none() {
            return Err(Error::InvalidInput(format!("{} has no image field", K::TABLE)));
        }
        if attachments && !K::HAS_ATTACHMENTS {
            return Err(Error::InvalidInput(format!("{} has no attachments", K::TABLE)));
        }
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    async fn fetch_row<'e, E>(executor: E, id: i64) -> Result<Option<ContentSnapshot>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!("{} WHERE id = ?", select_sql::<K>());
        let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
        row.as_ref().map(snapshot_from_row::<K>).transpose()
    }

    /// Entity with its attachments in display order.
    pub async fn find(&self, id: i64) -> Result<ContentSnapshot> {
        let mut snapshot = Self::fetch_row(&self.pool, id)
            .await?
            .ok_or_else(|| not_found::<K>(id))?;
        if K::HAS_ATTACHMENTS {
            snapshot.attachments = self.index.list(K::OWNER, id).await?;
        }
        Ok(snapshot)
    }

    /// The first row of the table, for singleton kinds.
    pub async fn find_singleton(&self) -> Result<Option<ContentSnapshot>> {
        let sql = format!("{} ORDER BY id LIMIT 1", select_sql::<K>());
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        let Some(mut snapshot) = row.as_ref().map(snapshot_from_row::<K>).transpose()? else {
            return Ok(None);
        };
        if K::HAS_ATTACHMENTS {
            snapshot.attachments = self.index.list(K::OWNER, snapshot.id).await?;
        }
        Ok(Some(snapshot))
    }

    /// Every row by ascending id, without attachments.
    pub async fn list_rows(&self) -> Result<Vec<ContentSnapshot>> {
        let sql = format!("{} ORDER BY id", select_sql::<K>());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(snapshot_from_row::<K>).collect()
    }

    /// Every row by ascending id, with attachments loaded in one query.
    pub async fn list(&self) -> Result<Vec<ContentSnapshot>> {
        let mut snapshots = self.list_rows().await?;
        if K::HAS_ATTACHMENTS && !snapshots.is_empty() {
            let mut by_owner: HashMap<i64, Vec<AttachmentRecord>> = HashMap::new();
            for record in self.index.list_kind(K::OWNER).await? {
                by_owner.entry(record.owner_id).or_default().push(record);
            }
            for snapshot in &mut snapshots {
                snapshot.attachments = by_owner.remove(&snapshot.id).unwrap_or_default();
            }
        }
        Ok(snapshots)
    }

    async fn locate(&self, target: Target) -> Result<Option<Located>> {
        let image_column = K::IMAGE_COLUMN.unwrap_or("NULL");
        let sql = match target {
            Target::Id(_) => format!("SELECT id, {image_column} AS image FROM {} WHERE id = ?", K::TABLE),
            Target::Singleton => {
                format!("SELECT id, {image_column} AS image FROM {} ORDER BY id LIMIT 1", K::TABLE)
            }
        };
        let mut query = sqlx::query(&sql);
        if let Target::Id(id) = target {
            query = query.bind(id);
        }
        let located = match query.fetch_optional(&self.pool).await? {
            Some(row) => Some(Located {
                id: row.try_get("id")?,
                image: row.try_get::<Option<String>, _>("image")?,
            }),
            None => None,
        };
        match (target, located) {
            (Target::Id(id), None) => Err(not_found::<K>(id)),
            (_, located) => Ok(located),
        }
    }

    // =========================================================================
    // TRANSACTIONAL WRITES
    // =========================================================================

    async fn insert_row_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        fields: &Fields,
        image: Option<&str>,
    ) -> Result<i64> {
        let mut columns: Vec<&'static str> = Vec::new();
        let mut values: Vec<Option<String>> = Vec::new();
        for (column, value) in fields.iter() {
            columns.push(*column);
            values.push(value.clone());
        }
        if let (Some(column), Some(uri)) = (K::IMAGE_COLUMN, image) {
            columns.push(column);
            values.push(Some(uri.to_string()));
        }

        let result = if columns.is_empty() {
            sqlx::query(&format!("INSERT INTO {} DEFAULT VALUES", K::TABLE))
                .execute(&mut **tx)
                .await?
        } else {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "INSERT INTO {} ({}) VALUES (",
                K::TABLE,
                columns.join(", ")
            ));
            let mut separated = qb.separated(", ");
            for value in values {
                separated.push_bind(value);
            }
            separated.push_unseparated(")");
            qb.build().execute(&mut **tx).await?
        };
        Ok(result.last_insert_rowid())
    }

    async fn create_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        fields: &Fields,
        image: Option<&str>,
        uris: &[String],
    ) -> Result<i64> {
        let id = self.insert_row_tx(tx, fields, image).await?;
        if K::HAS_ATTACHMENTS {
            self.index.add_many_tx(tx, K::OWNER, id, uris).await?;
            self.index.resequence_tx(tx, K::OWNER, id).await?;
        }
        Ok(id)
    }

    /// Apply a patch; returns the row id and the attachment uris removed.
    async fn update_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        existing: Option<i64>,
        fields: &Fields,
        image: Option<&str>,
        remove_ids: Option<&[i64]>,
        added: &[String],
    ) -> Result<(i64, Vec<String>)> {
        let id = match existing {
            Some(id) => id,
            None => self.insert_row_tx(tx, &Fields::new(), None).await?,
        };

        let mut assignments: Vec<(&'static str, Option<String>)> = fields.iter().cloned().collect();
        if let (Some(column), Some(uri)) = (K::IMAGE_COLUMN, image) {
            assignments.push((column, Some(uri.to_string())));
        }
        if !assignments.is_empty() {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", K::TABLE));
            let mut separated = qb.separated(", ");
            for (column, value) in assignments {
                separated.push(format!("{column} = "));
                separated.push_bind_unseparated(value);
            }
            qb.push(" WHERE id = ");
            qb.push_bind(id);
            if qb.build().execute(&mut **tx).await?.rows_affected() == 0 {
                return Err(not_found::<K>(id));
            }
        }

        let mut changed = false;
        let mut removed = Vec::new();
        if let Some(ids) = remove_ids.filter(|ids| !ids.is_empty()) {
            let current = self.index.find_by_ids_tx(tx, K::OWNER, id, ids).await?;
            if !current.is_empty() {
                let matched: Vec<i64> = current.iter().map(|r| r.id).collect();
                self.index.remove_by_ids_tx(tx, K::OWNER, id, &matched).await?;
                removed = current.into_iter().map(|r| r.blob_uri).collect();
                changed = true;
            }
        }
        if !added.is_empty() {
            self.index.add_many_tx(tx, K::OWNER, id, added).await?;
            changed = true;
        }
        if changed {
            self.index.resequence_tx(tx, K::OWNER, id).await?;
        }
        Ok((id, removed))
    }

    async fn remove_tx(&self, tx: &mut Transaction<'_, Sqlite>, id: i64) -> Result<()> {
        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", K::TABLE))
            .bind(id)
            .execute(&mut **tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(not_found::<K>(id));
        }
        if K::HAS_ATTACHMENTS {
            self.index.remove_all_tx(tx, K::OWNER, id).await?;
        }
        Ok(())
    }

    // =========================================================================
    // PUBLIC WRITE PROTOCOL
    // =========================================================================

    /// Stage blobs, insert the row and its attachments, and return the new id.
    pub async fn create(&self, new: NewContent) -> Result<i64> {
        let start = Instant::now();
        new.fields.validate::<K>()?;
        self.check_shape(new.image.is_some(), !new.attachments.is_empty())?;

        let mut ledger = BlobLedger::new(self.blobs.as_ref());
        let image = match &new.image {
            Some(payload) => Some(ledger.stage(payload).await?),
            None => None,
        };
        let uris = ledger.stage_all(&new.attachments).await?;

        let mut tx = match self.gate.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                ledger.purge_staged().await;
                return Err(err);
            }
        };
        let staged = self
            .create_tx(&mut tx, &new.fields, image.as_deref(), &uris)
            .await;

        match TransactionGate::settle(tx, staged).await {
            TxOutcome::Committed(id) => {
                info!(
                    subsystem = "db",
                    component = "content",
                    op = "create",
                    owner_kind = %K::OWNER,
                    owner_id = id,
                    blob_count = uris.len() + usize::from(image.is_some()),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Content created"
                );
                Ok(id)
            }
            TxOutcome::Aborted(err) => {
                ledger.purge_staged().await;
                warn!(
                    subsystem = "db",
                    component = "content",
                    op = "create",
                    owner_kind = %K::OWNER,
                    outcome = "aborted",
                    error = %err,
                    "Create rolled back, staged blobs purged"
                );
                Err(err)
            }
        }
    }

    /// Partially update an entity. Only supplied parts are touched.
    ///
    /// Removal ids outside the entity's current attachments are ignored.
    /// Attachments are resequenced when the set changed. A replaced image and
    /// removed attachments are purged after commit.
    pub async fn update(&self, target: Target, patch: ContentPatch) -> Result<UpdateOutcome> {
        let start = Instant::now();
        patch.fields.validate::<K>()?;
        let wants_attachments = patch.remove_attachment_ids.as_ref().is_some_and(|v| !v.is_empty())
            || patch.add_attachments.as_ref().is_some_and(|v| !v.is_empty());
        self.check_shape(patch.image.is_some(), wants_attachments)?;

        let located = self.locate(target).await?;
        let previous_image = located.as_ref().and_then(|l| l.image.clone());

        let mut ledger = BlobLedger::new(self.blobs.as_ref());
        let image = match &patch.image {
            Some(payload) => Some(ledger.stage(payload).await?),
            None => None,
        };
        let added = match &patch.add_attachments {
            Some(payloads) => ledger.stage_all(payloads).await?,
            None => Vec::new(),
        };

        let mut tx = match self.gate.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                ledger.purge_staged().await;
                return Err(err);
            }
        };
        let staged = self
            .update_tx(
                &mut tx,
                located.as_ref().map(|l| l.id),
                &patch.fields,
                image.as_deref(),
                patch.remove_attachment_ids.as_deref(),
                &added,
            )
            .await;

        match TransactionGate::settle(tx, staged).await {
            TxOutcome::Committed((id, removed_uris)) => {
                let replaced_image = if image.is_some() { previous_image } else { None };
                if let Some(previous) = &replaced_image {
                    ledger.retire(previous.clone());
                }
                ledger.retire_all(removed_uris.iter().cloned());
                let unpurged = ledger.purge_retired().await;

                info!(
                    subsystem = "db",
                    component = "content",
                    op = "update",
                    owner_kind = %K::OWNER,
                    owner_id = id,
                    removed = removed_uris.len(),
                    added = added.len(),
                    unpurged = unpurged.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Content updated"
                );
                Ok(UpdateOutcome {
                    removed_uris,
                    replaced_image,
                    unpurged,
                })
            }
            TxOutcome::Aborted(err) => {
                ledger.purge_staged().await;
                warn!(
                    subsystem = "db",
                    component = "content",
                    op = "update",
                    owner_kind = %K::OWNER,
                    outcome = "aborted",
                    error = %err,
                    "Update rolled back, staged blobs purged"
                );
                Err(err)
            }
        }
    }

    /// Delete an entity and its attachments, then purge every blob it used.
    pub async fn remove(&self, id: i64) -> Result<RemoveOutcome> {
        let start = Instant::now();
        let snapshot = self.find(id).await?;
        let mut uris: Vec<String> = snapshot
            .attachments
            .into_iter()
            .map(|record| record.blob_uri)
            .collect();
        uris.extend(snapshot.image);

        let mut tx = self.gate.begin().await?;
        let staged = self.remove_tx(&mut tx, id).await;

        match TransactionGate::settle(tx, staged).await {
            TxOutcome::Committed(()) => {
                let mut ledger = BlobLedger::new(self.blobs.as_ref());
                ledger.retire_all(uris.iter().cloned());
                let unpurged = ledger.purge_retired().await;
                info!(
                    subsystem = "db",
                    component = "content",
                    op = "remove",
                    owner_kind = %K::OWNER,
                    owner_id = id,
                    blob_count = uris.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Content removed"
                );
                Ok(RemoveOutcome {
                    purged_uris: uris,
                    unpurged,
                })
            }
            TxOutcome::Aborted(err) => Err(err),
        }
    }
}
