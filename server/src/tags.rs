//! Tag store operations: implicit get-or-create resolution, per-image tag editing, and the maintenance
//! actions (rename, merge, category change, orphan cleanup) exposed by the tag manager.

use {
    crate::warp_util::{bad_request, not_found},
    anyhow::Result,
    booru_shared::{
        tag_expression::{Tag, TagCategory},
        ActionMessage, AutocompleteQuery, TagSort, TagSummary, TagsSearchQuery, TagsSearchResponse,
        TagsSummaryResponse, UpdateTagsRequest, UpdateTagsResponse,
    },
    chrono::Utc,
    futures::TryStreamExt,
    sqlx::{Connection, Row, SqliteConnection},
    std::collections::{BTreeSet, HashMap},
};

const DEFAULT_TAG_PAGE_SIZE: u32 = 50;

const DEFAULT_AUTOCOMPLETE_LIMIT: u32 = 10;

const DEFAULT_RECENT_LIMIT: u32 = 25;

/// Resolve each of `tags` to its row id, inserting rows for (name, category) pairs seen for the first time.
///
/// Tag creation is always implicit on write; callers never create tags explicitly.  Every resolved tag has
/// its `last_used_at` timestamp touched.
pub async fn get_or_create_tags(
    conn: &mut SqliteConnection,
    tags: &BTreeSet<Tag>,
) -> Result<HashMap<Tag, i64>> {
    let now = Utc::now().to_rfc3339();
    let mut ids = HashMap::new();

    for tag in tags {
        let category = tag.category.to_string();

        let id = if let Some(row) =
            sqlx::query("SELECT id FROM tags WHERE name = ?1 AND category = ?2")
                .bind(&tag.name)
                .bind(&category)
                .fetch_optional(&mut *conn)
                .await?
        {
            let id = row.get::<i64, _>(0);

            sqlx::query("UPDATE tags SET last_used_at = ?1 WHERE id = ?2")
                .bind(&now)
                .bind(id)
                .execute(&mut *conn)
                .await?;

            id
        } else {
            sqlx::query("INSERT INTO tags (name, category, last_used_at) VALUES (?1, ?2, ?3)")
                .bind(&tag.name)
                .bind(&category)
                .bind(&now)
                .execute(&mut *conn)
                .await?
                .last_insert_rowid()
        };

        ids.insert(tag.clone(), id);
    }

    Ok(ids)
}

/// Load the complete tag set currently attached to `image_id`.
pub async fn image_tags(conn: &mut SqliteConnection, image_id: i64) -> Result<BTreeSet<Tag>> {
    let mut tags = BTreeSet::new();

    let mut rows = sqlx::query(
        "SELECT t.name, t.category FROM image_tags it \
         INNER JOIN tags t ON t.id = it.tag_id \
         WHERE it.image_id = ?1",
    )
    .bind(image_id)
    .fetch(&mut *conn);

    while let Some(row) = rows.try_next().await? {
        tags.insert(Tag {
            name: row.get::<&str, _>(0).to_owned(),
            category: row.get::<&str, _>(1).parse()?,
        });
    }

    Ok(tags)
}

/// Replace the entire tag set of a single image, issuing only the inserts and deletes the diff requires.
///
/// This services the lightbox editor; unlike a batch operation it records no undo state.
pub async fn update_image_tags(
    conn: &mut SqliteConnection,
    image_id: i64,
    request: &UpdateTagsRequest,
) -> Result<UpdateTagsResponse> {
    if sqlx::query("SELECT 1 FROM images WHERE id = ?1")
        .bind(image_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_none()
    {
        return Err(not_found("image not found"));
    }

    let new_tags = request
        .tags
        .iter()
        .filter_map(|s| s.parse::<Tag>().ok())
        .collect::<BTreeSet<_>>();

    let mut tx = conn.begin().await?;

    let current = image_tags(&mut tx, image_id).await?;
    let ids = get_or_create_tags(&mut tx, &new_tags).await?;

    for tag in new_tags.difference(&current) {
        sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)")
            .bind(image_id)
            .bind(ids[tag])
            .execute(&mut *tx)
            .await?;
    }

    for tag in current.difference(&new_tags) {
        sqlx::query(
            "DELETE FROM image_tags WHERE image_id = ?1 AND tag_id = \
             (SELECT id FROM tags WHERE name = ?2 AND category = ?3)",
        )
        .bind(image_id)
        .bind(&tag.name)
        .bind(tag.category.to_string())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(UpdateTagsResponse {
        message: "tags updated".into(),
        tags: new_tags.into_iter().collect(),
    })
}

/// All tags with usage counts, plus the number of untagged images.
pub async fn summary(conn: &mut SqliteConnection) -> Result<TagsSummaryResponse> {
    let mut tags = Vec::new();

    {
        let mut rows = sqlx::query(
            "SELECT t.id, t.name, t.category, count(it.image_id) FROM tags t \
             LEFT JOIN image_tags it ON it.tag_id = t.id \
             GROUP BY t.id \
             ORDER BY t.category, t.name",
        )
        .fetch(&mut *conn);

        while let Some(row) = rows.try_next().await? {
            tags.push(TagSummary {
                id: row.get(0),
                name: row.get::<&str, _>(1).to_owned(),
                category: row.get::<&str, _>(2).parse()?,
                count: row.get(3),
            });
        }
    }

    let untagged_count = sqlx::query(
        "SELECT count(*) FROM images i \
         WHERE NOT EXISTS (SELECT 1 FROM image_tags WHERE image_id = i.id)",
    )
    .fetch_one(&mut *conn)
    .await?
    .get(0);

    Ok(TagsSummaryResponse {
        tags,
        untagged_count,
    })
}

/// Paginated, searchable tag listing with usage counts; the backing query for the tag manager.
pub async fn search(
    conn: &mut SqliteConnection,
    query: &TagsSearchQuery,
) -> Result<TagsSearchResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TAG_PAGE_SIZE)
        .clamp(1, 100);

    let mut clause = String::from("1");
    let mut binds = Vec::new();

    if let Some(q) = &query.q {
        let q = q.trim().to_lowercase();

        if !q.is_empty() {
            let (category, name) = match q.split_once(':') {
                Some((prefix, rest)) => match prefix.parse::<TagCategory>() {
                    Ok(category) if !rest.is_empty() => (Some(category), rest.to_owned()),
                    _ => (None, q.clone()),
                },
                None => (None, q.clone()),
            };

            if let Some(category) = category {
                clause = "t.category = ? AND t.name LIKE ? ESCAPE '\\'".into();
                binds.push(category.to_string());
            } else {
                clause = "t.name LIKE ? ESCAPE '\\'".into();
            }

            binds.push(format!("%{}%", crate::images::escape_like(&name)));
        }
    }

    let having = if query.orphans_only {
        "HAVING count(it.image_id) = 0"
    } else {
        ""
    };

    let total = {
        let sql = format!(
            "SELECT count(*) FROM \
             (SELECT t.id FROM tags t \
              LEFT JOIN image_tags it ON it.tag_id = t.id \
              WHERE {clause} GROUP BY t.id {having})"
        );

        let mut select = sqlx::query(&sql);

        for bind in &binds {
            select = select.bind(bind.clone());
        }

        select.fetch_one(&mut *conn).await?.get::<u32, _>(0)
    };

    let order = match query.sort_by {
        TagSort::Name => "t.category, t.name",
        TagSort::Count => "count(it.image_id) DESC, t.name",
    };

    let sql = format!(
        "SELECT t.id, t.name, t.category, count(it.image_id) FROM tags t \
         LEFT JOIN image_tags it ON it.tag_id = t.id \
         WHERE {clause} \
         GROUP BY t.id {having} \
         ORDER BY {order} \
         LIMIT ? OFFSET ?"
    );

    let mut select = sqlx::query(&sql);

    for bind in &binds {
        select = select.bind(bind.clone());
    }

    let mut tags = Vec::new();

    // Widened so huge caller-supplied page numbers mean "past the end", not overflow.
    let mut rows = select
        .bind(limit)
        .bind(i64::from(page - 1) * i64::from(limit))
        .fetch(&mut *conn);

    while let Some(row) = rows.try_next().await? {
        tags.push(TagSummary {
            id: row.get(0),
            name: row.get::<&str, _>(1).to_owned(),
            category: row.get::<&str, _>(2).parse()?,
            count: row.get(3),
        });
    }

    Ok(TagsSearchResponse {
        tags,
        page,
        limit,
        total,
        has_more: u64::from(page) * u64::from(limit) < u64::from(total),
    })
}

/// Prefix-match tag names for the search box, formatted as the user would type them.
///
/// An unqualified prefix searches every category, consistent with query semantics.
pub async fn autocomplete(
    conn: &mut SqliteConnection,
    query: &AutocompleteQuery,
) -> Result<Vec<String>> {
    let q = query.q.trim().to_lowercase();
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUTOCOMPLETE_LIMIT)
        .clamp(1, 50);

    if q.is_empty() {
        return Ok(Vec::new());
    }

    let (category, name) = match q.split_once(':') {
        Some((prefix, rest)) => match prefix.parse::<TagCategory>() {
            Ok(category) if !rest.is_empty() => (Some(category), rest.to_owned()),
            _ => (None, q.clone()),
        },
        None => (None, q.clone()),
    };

    let pattern = format!("{}%", crate::images::escape_like(&name));

    let mut select = if let Some(category) = category {
        sqlx::query(
            "SELECT name, category FROM tags \
             WHERE category = ?1 AND name LIKE ?2 ESCAPE '\\' \
             ORDER BY name LIMIT ?3",
        )
        .bind(category.to_string())
        .bind(pattern)
        .bind(limit)
    } else {
        sqlx::query(
            "SELECT name, category FROM tags \
             WHERE name LIKE ?1 ESCAPE '\\' \
             ORDER BY name, category LIMIT ?2",
        )
        .bind(pattern)
        .bind(limit)
    }
    .fetch(&mut *conn);

    let mut results = Vec::new();

    while let Some(row) = select.try_next().await? {
        results.push(
            Tag {
                name: row.get::<&str, _>(0).to_owned(),
                category: row.get::<&str, _>(1).parse()?,
            }
            .to_string(),
        );
    }

    Ok(results)
}

/// Most recently used tags, newest first, formatted as the user would type them.
pub async fn recent(conn: &mut SqliteConnection, limit: Option<u32>) -> Result<Vec<String>> {
    let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, 100);

    let mut results = Vec::new();

    let mut rows =
        sqlx::query("SELECT name, category FROM tags ORDER BY last_used_at DESC LIMIT ?1")
            .bind(limit)
            .fetch(&mut *conn);

    while let Some(row) = rows.try_next().await? {
        results.push(
            Tag {
                name: row.get::<&str, _>(0).to_owned(),
                category: row.get::<&str, _>(1).parse()?,
            }
            .to_string(),
        );
    }

    Ok(results)
}

async fn tag_by_id(conn: &mut SqliteConnection, tag_id: i64) -> Result<Tag> {
    if let Some(row) = sqlx::query("SELECT name, category FROM tags WHERE id = ?1")
        .bind(tag_id)
        .fetch_optional(&mut *conn)
        .await?
    {
        Ok(Tag {
            name: row.get::<&str, _>(0).to_owned(),
            category: row.get::<&str, _>(1).parse()?,
        })
    } else {
        Err(not_found("tag not found"))
    }
}

/// Rename a tag within its category; the new name must not collide with an existing tag there.
pub async fn rename(
    conn: &mut SqliteConnection,
    tag_id: i64,
    new_name: &str,
) -> Result<ActionMessage> {
    let tag = tag_by_id(conn, tag_id).await?;

    let new_name = new_name.trim().to_lowercase();

    if new_name.is_empty() {
        return Err(bad_request("new tag name cannot be empty"));
    }

    if new_name.contains(',') {
        return Err(bad_request("tag names may not contain commas"));
    }

    if sqlx::query("SELECT 1 FROM tags WHERE name = ?1 AND category = ?2 AND id != ?3")
        .bind(&new_name)
        .bind(tag.category.to_string())
        .bind(tag_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some()
    {
        return Err(bad_request(format!(
            "a tag named '{new_name}' already exists in the '{}' category",
            tag.category
        )));
    }

    sqlx::query("UPDATE tags SET name = ?1 WHERE id = ?2")
        .bind(&new_name)
        .bind(tag_id)
        .execute(&mut *conn)
        .await?;

    Ok(ActionMessage {
        message: format!("tag renamed to '{new_name}'"),
    })
}

/// Merge one tag into another, transferring all image associations to the surviving tag.
pub async fn merge(
    conn: &mut SqliteConnection,
    keep_id: i64,
    delete_id: i64,
) -> Result<ActionMessage> {
    if keep_id == delete_id {
        return Err(bad_request("cannot merge a tag with itself"));
    }

    let keep = tag_by_id(conn, keep_id).await?;
    let delete = tag_by_id(conn, delete_id).await?;

    let mut tx = conn.begin().await?;

    sqlx::query(
        "INSERT OR IGNORE INTO image_tags (image_id, tag_id) \
         SELECT image_id, ?1 FROM image_tags WHERE tag_id = ?2",
    )
    .bind(keep_id)
    .bind(delete_id)
    .execute(&mut *tx)
    .await?;

    // Cascade removes the loser's remaining association rows.
    sqlx::query("DELETE FROM tags WHERE id = ?1")
        .bind(delete_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE tags SET last_used_at = ?1 WHERE id = ?2")
        .bind(Utc::now().to_rfc3339())
        .bind(keep_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(ActionMessage {
        message: format!("tag '{delete}' merged into '{keep}'"),
    })
}

/// Move a tag to another category, rejecting the move if the name already exists there.
pub async fn change_category(
    conn: &mut SqliteConnection,
    tag_id: i64,
    new_category: TagCategory,
) -> Result<ActionMessage> {
    let tag = tag_by_id(conn, tag_id).await?;

    if sqlx::query("SELECT 1 FROM tags WHERE name = ?1 AND category = ?2 AND id != ?3")
        .bind(&tag.name)
        .bind(new_category.to_string())
        .bind(tag_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some()
    {
        return Err(bad_request(format!(
            "a tag named '{}' already exists in the '{new_category}' category; merge them instead",
            tag.name
        )));
    }

    sqlx::query("UPDATE tags SET category = ?1 WHERE id = ?2")
        .bind(new_category.to_string())
        .bind(tag_id)
        .execute(&mut *conn)
        .await?;

    Ok(ActionMessage {
        message: format!(
            "category for tag '{}' changed from '{}' to '{new_category}'",
            tag.name, tag.category
        ),
    })
}

/// Delete a tag along with all of its image associations.
pub async fn force_delete(conn: &mut SqliteConnection, tag_id: i64) -> Result<ActionMessage> {
    let tag = tag_by_id(conn, tag_id).await?;

    sqlx::query("DELETE FROM tags WHERE id = ?1")
        .bind(tag_id)
        .execute(&mut *conn)
        .await?;

    Ok(ActionMessage {
        message: format!("tag '{tag}' and its associations were deleted"),
    })
}

/// Delete every tag with no image associations.
pub async fn delete_orphans(conn: &mut SqliteConnection) -> Result<ActionMessage> {
    let deleted = sqlx::query(
        "DELETE FROM tags WHERE NOT EXISTS \
         (SELECT 1 FROM image_tags WHERE tag_id = tags.id)",
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(ActionMessage {
        message: format!("deleted {deleted} orphan tag(s)"),
    })
}
