//! The batch tagging engine: apply one action to many images in a single transaction, recording a
//! reversible delta so the whole operation can be undone.

use {
    crate::{
        tags,
        undo::{ImageDelta, UndoRecord, UndoStore},
        warp_util::bad_request,
    },
    anyhow::Result,
    booru_shared::{
        tag_expression::{parse_tag_list, Tag},
        BatchAction, BatchDeleteRequest, BatchTagRequest, BatchTagResponse, UndoResponse,
    },
    sqlx::{Connection, SqliteConnection},
    std::{
        collections::{BTreeSet, HashMap},
        path::Path,
    },
    tracing::{info, warn},
};

/// Compute the exact delta `action` would cause on an image currently tagged `current`.
///
/// Pure function of the pre-mutation state; the applier then performs exactly the inserts and deletes the
/// delta names, so the recorded delta and the actual mutation cannot drift apart.
fn compute_delta(
    image_id: i64,
    current: &BTreeSet<Tag>,
    action: BatchAction,
    requested: &BTreeSet<Tag>,
) -> ImageDelta {
    let (added, removed) = match action {
        BatchAction::Add => (
            requested.difference(current).cloned().collect(),
            Vec::new(),
        ),
        BatchAction::Remove => (
            Vec::new(),
            requested.intersection(current).cloned().collect(),
        ),
        BatchAction::Replace => (
            requested.difference(current).cloned().collect(),
            current.difference(requested).cloned().collect(),
        ),
    };

    ImageDelta {
        image_id,
        added,
        removed,
    }
}

async fn apply_delta(
    conn: &mut SqliteConnection,
    delta: &ImageDelta,
    ids: &HashMap<Tag, i64>,
) -> Result<()> {
    for tag in &delta.added {
        sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)")
            .bind(delta.image_id)
            .bind(ids[tag])
            .execute(&mut *conn)
            .await?;
    }

    for tag in &delta.removed {
        sqlx::query(
            "DELETE FROM image_tags WHERE image_id = ?1 AND tag_id = \
             (SELECT id FROM tags WHERE name = ?2 AND category = ?3)",
        )
        .bind(delta.image_id)
        .bind(&tag.name)
        .bind(tag.category.to_string())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Apply a batch tag operation atomically across all targeted images.
///
/// The undo record is persisted before the mutation is applied, inside the same transaction scope, so a
/// crash can never leave a mutation behind with no way to reverse it.  If persisting the record fails the
/// mutation still proceeds, reported with `undo_available: false`.
pub async fn batch_tag(
    conn: &mut SqliteConnection,
    undo: &dyn UndoStore,
    request: &BatchTagRequest,
) -> Result<BatchTagResponse> {
    if request.image_ids.is_empty() {
        return Err(bad_request("image_ids must be non-empty"));
    }

    let requested = parse_tag_list(&request.tags);

    // "Replace with nothing" legitimately clears all tags; add and remove need at least one.
    if requested.is_empty() && request.action != BatchAction::Replace {
        return Err(bad_request(format!(
            "no valid tags supplied for {} operation",
            request.action
        )));
    }

    let mut tx = conn.begin().await?;

    let ids = tags::get_or_create_tags(&mut tx, &requested).await?;

    let mut deltas = Vec::new();
    let mut skipped = 0;

    for &image_id in &request.image_ids {
        if sqlx::query("SELECT 1 FROM images WHERE id = ?1")
            .bind(image_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_none()
        {
            skipped += 1;
            continue;
        }

        let current = tags::image_tags(&mut tx, image_id).await?;
        let delta = compute_delta(image_id, &current, request.action, &requested);

        if delta.is_empty() {
            skipped += 1;
        } else {
            deltas.push(delta);
        }
    }

    let undo_available = if deltas.is_empty() {
        // Nothing changed; the previous operation remains undoable.
        tx.commit().await?;

        return Ok(BatchTagResponse {
            affected: 0,
            skipped,
            undo_available: false,
            message: format!("no images were changed by the {} operation", request.action),
        });
    } else {
        match undo.save(&UndoRecord {
            action: request.action,
            deltas: deltas.clone(),
        }) {
            Ok(()) => true,
            Err(e) => {
                warn!("unable to persist undo state: {e:?}");

                false
            }
        }
    };

    for delta in &deltas {
        apply_delta(&mut tx, delta, &ids).await?;
    }

    tx.commit().await?;

    let affected = deltas.len() as u32;

    info!(
        "batch {} applied to {affected} image(s), {skipped} skipped",
        request.action
    );

    Ok(BatchTagResponse {
        affected,
        skipped,
        undo_available,
        message: format!(
            "{} operation applied to {affected} image(s) ({skipped} unchanged)",
            request.action
        ),
    })
}

/// Reverse the most recent batch tag operation, if any.
///
/// Inverts each recorded delta in a single transaction, then clears the stored record; a second undo is a
/// no-op.  Images deleted since the operation are skipped silently.
pub async fn undo_last(conn: &mut SqliteConnection, undo: &dyn UndoStore) -> Result<UndoResponse> {
    let record = match undo.load() {
        Some(record) => record,
        None => {
            return Ok(UndoResponse {
                undone: false,
                restored: 0,
                message: "nothing to undo".into(),
            })
        }
    };

    let mut tx = conn.begin().await?;

    let mut restored = 0;

    for delta in &record.deltas {
        if sqlx::query("SELECT 1 FROM images WHERE id = ?1")
            .bind(delta.image_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_none()
        {
            continue;
        }

        // Tags removed by the operation may have been deleted since; re-create them as needed.
        let removed = delta.removed.iter().cloned().collect::<BTreeSet<_>>();
        let ids = tags::get_or_create_tags(&mut tx, &removed).await?;

        let inverse = ImageDelta {
            image_id: delta.image_id,
            added: delta.removed.clone(),
            removed: delta.added.clone(),
        };

        apply_delta(&mut tx, &inverse, &ids).await?;

        restored += 1;
    }

    tx.commit().await?;

    undo.clear();

    info!("undid batch {} across {restored} image(s)", record.action);

    Ok(UndoResponse {
        undone: true,
        restored,
        message: format!(
            "undid {} operation; restored tags on {restored} image(s)",
            record.action
        ),
    })
}

/// Permanently delete images, their stored files, and their tag associations.
///
/// Not undoable; any pending undo record is cleared since its target images may no longer exist.
pub async fn batch_delete(
    conn: &mut SqliteConnection,
    undo: &dyn UndoStore,
    media_dir: &Path,
    thumbnail_dir: &Path,
    request: &BatchDeleteRequest,
) -> Result<BatchTagResponse> {
    if request.image_ids.is_empty() {
        return Err(bad_request("image_ids must be non-empty"));
    }

    let mut affected = 0;
    let mut skipped = 0;

    for &image_id in &request.image_ids {
        let filename = sqlx::query_scalar::<_, String>("SELECT filename FROM images WHERE id = ?1")
            .bind(image_id)
            .fetch_optional(&mut *conn)
            .await?;

        let filename = match filename {
            Some(filename) => filename,
            None => {
                skipped += 1;
                continue;
            }
        };

        // Cascade removes the image's association rows.
        sqlx::query("DELETE FROM images WHERE id = ?1")
            .bind(image_id)
            .execute(&mut *conn)
            .await?;

        crate::media::delete_image_files(media_dir, thumbnail_dir, &filename).await;

        affected += 1;
    }

    undo.clear();

    info!("deleted {affected} image(s), {skipped} skipped");

    Ok(BatchTagResponse {
        affected,
        skipped,
        undo_available: false,
        message: format!("deleted {affected} image(s) ({skipped} not found)"),
    })
}
