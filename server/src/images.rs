//! Image search: pushes a parsed [TagQuery] down to SQL so filtering and pagination happen in the
//! database rather than in memory.
//!
//! SQL text generation ([append_filter_clause]) and parameter binding ([bind_filter_clause]) walk the query
//! tree separately but in the same deterministic order, so the placeholders and their values always line up.

use {
    crate::{
        media,
        warp_util::{bad_gateway, bad_request},
    },
    anyhow::Result,
    booru_shared::{
        tag_expression::{self, Tag, TagPattern, TagQuery},
        ImageSummary, ImagesQuery, ImagesResponse, UploadFromUrlRequest, UploadResponse,
    },
    chrono::Utc,
    reqwest::header::CONTENT_TYPE,
    sqlx::{query::Query, sqlite::SqliteArguments, Row, Sqlite, SqliteConnection},
    std::{collections::BTreeSet, path::Path},
    tracing::{info, warn},
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

const MAX_PAGE_SIZE: u32 = 100;

/// Escape LIKE metacharacters in a literal fragment, for use with `ESCAPE '\'`.
pub(crate) fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());

    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }

        escaped.push(c);
    }

    escaped
}

/// The LIKE pattern equivalent of a wildcard [TagPattern]: the first `*` becomes `%` and everything else is
/// matched literally.
fn like_pattern(pattern: &TagPattern) -> String {
    let (prefix, suffix) = pattern.name.split_once('*').unwrap_or((&pattern.name, ""));

    format!("{}%{}", escape_like(prefix), escape_like(suffix))
}

/// Append the SQL predicate for `query` to `buffer`, assuming the enclosing SELECT aliases the images table
/// as `i`.
pub fn append_filter_clause(buffer: &mut String, query: &TagQuery) {
    match query {
        TagQuery::And(children) => {
            if children.is_empty() {
                // The empty conjunction matches everything.
                buffer.push('1');
            } else {
                buffer.push('(');

                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        buffer.push_str(" AND ");
                    }

                    append_filter_clause(buffer, child);
                }

                buffer.push(')');
            }
        }

        TagQuery::Or(children) => {
            if children.is_empty() {
                buffer.push('0');
            } else {
                buffer.push('(');

                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        buffer.push_str(" OR ");
                    }

                    append_filter_clause(buffer, child);
                }

                buffer.push(')');
            }
        }

        TagQuery::Not(child) => {
            buffer.push_str("NOT (");
            append_filter_clause(buffer, child);
            buffer.push(')');
        }

        TagQuery::Tag(pattern) => {
            buffer.push_str(
                "EXISTS (SELECT 1 FROM image_tags it \
                 INNER JOIN tags t ON t.id = it.tag_id \
                 WHERE it.image_id = i.id AND t.name ",
            );

            buffer.push_str(if pattern.wildcard {
                "LIKE ? ESCAPE '\\'"
            } else {
                "= ?"
            });

            if pattern.category.is_some() {
                buffer.push_str(" AND t.category = ?");
            }

            buffer.push(')');
        }

        TagQuery::Untagged => {
            buffer.push_str("NOT EXISTS (SELECT 1 FROM image_tags it WHERE it.image_id = i.id)");
        }
    }
}

/// Bind the parameters for the placeholders [append_filter_clause] emitted for `query`, in the same order.
pub fn bind_filter_clause<'a>(
    query: &TagQuery,
    select: Query<'a, Sqlite, SqliteArguments<'a>>,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
    query.fold_patterns(select, |select, pattern| {
        let select = if pattern.wildcard {
            select.bind(like_pattern(pattern))
        } else {
            select.bind(pattern.name.clone())
        };

        if let Some(category) = pattern.category {
            select.bind(category.to_string())
        } else {
            select
        }
    })
}

/// Run a paginated image search, newest first.
///
/// An absent or unparseable `q` degrades to matching every image; `page` and `limit` are clamped rather
/// than rejected.
pub async fn search(conn: &mut SqliteConnection, query: &ImagesQuery) -> Result<ImagesResponse> {
    let filter = tag_expression::parse(query.q.as_deref().unwrap_or(""));

    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let mut clause = String::new();
    append_filter_clause(&mut clause, &filter);

    let count_sql = format!("SELECT count(*) FROM images i WHERE {clause}");

    let total = bind_filter_clause(&filter, sqlx::query(&count_sql))
        .fetch_one(&mut *conn)
        .await?
        .get::<u32, _>(0);

    let select_sql = format!(
        "SELECT i.id, i.filename, \
         (SELECT group_concat(t.category || ':' || t.name) FROM image_tags it \
          INNER JOIN tags t ON t.id = it.tag_id \
          WHERE it.image_id = i.id) \
         FROM images i \
         WHERE {clause} \
         ORDER BY i.id DESC \
         LIMIT ? OFFSET ?"
    );

    // Page arithmetic is widened so huge caller-supplied page numbers mean "past the end", not overflow.
    let rows = bind_filter_clause(&filter, sqlx::query(&select_sql))
        .bind(limit)
        .bind(i64::from(page - 1) * i64::from(limit))
        .fetch_all(&mut *conn)
        .await?;

    let mut images = Vec::with_capacity(rows.len());

    for row in rows {
        // Tag names cannot contain commas, so the concatenated list splits unambiguously.
        let tags = row
            .get::<Option<&str>, _>(2)
            .map(|concatenated| {
                concatenated
                    .split(',')
                    .map(|tag| tag.parse::<Tag>())
                    .collect::<Result<BTreeSet<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        images.push(ImageSummary {
            id: row.get(0),
            filename: crate::media::relative_path(row.get(1))
                .to_string_lossy()
                .into_owned(),
            tags: tags.into_iter().collect(),
        });
    }

    Ok(ImagesResponse {
        images,
        page,
        limit,
        total,
        has_more: u64::from(page) * u64::from(limit) < u64::from(total),
    })
}

/// Store a set of uploaded files, skipping byte-identical duplicates.
///
/// Each file succeeds or fails independently; one undecodable file never blocks the rest of the batch.
/// `initial_tags` are attached to every newly stored image (not to duplicates, which already have their
/// own tags).
pub async fn upload(
    conn: &mut SqliteConnection,
    media_dir: &Path,
    thumbnail_dir: &Path,
    files: Vec<(String, Vec<u8>)>,
    initial_tags: &BTreeSet<Tag>,
) -> Result<UploadResponse> {
    if files.is_empty() {
        return Err(bad_request("no files supplied"));
    }

    let tag_ids = crate::tags::get_or_create_tags(conn, initial_tags).await?;

    let mut uploaded = 0;
    let mut duplicates = 0;
    let mut failed = 0;

    for (name, content) in &files {
        let (filename, hash) = match media::content_address(name, content) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("rejecting upload {name}: {e}");
                failed += 1;
                continue;
            }
        };

        if sqlx::query("SELECT 1 FROM images WHERE hash = ?1")
            .bind(&hash)
            .fetch_optional(&mut *conn)
            .await?
            .is_some()
        {
            duplicates += 1;
            continue;
        }

        if let Err(e) = media::store_image(media_dir, thumbnail_dir, &filename, content).await {
            warn!("unable to store upload {name}: {e:?}");
            failed += 1;
            continue;
        }

        let image_id =
            sqlx::query("INSERT INTO images (filename, hash, created_at) VALUES (?1, ?2, ?3)")
                .bind(&filename)
                .bind(&hash)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *conn)
                .await?
                .last_insert_rowid();

        for id in tag_ids.values() {
            sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)")
                .bind(image_id)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }

        uploaded += 1;
    }

    Ok(UploadResponse {
        uploaded,
        duplicates,
        failed,
        message: format!("{uploaded} uploaded, {duplicates} duplicate(s), {failed} failed"),
    })
}

/// Download an image from a URL and store it exactly as an upload would be, skipping byte-identical
/// duplicates.
///
/// This serves "save to gallery" browser integrations.  The stored extension comes from the URL path when
/// usable, falling back to the response's content type; a failed download is reported as a bad gateway
/// rather than an internal error.
pub async fn upload_from_url(
    conn: &mut SqliteConnection,
    client: &reqwest::Client,
    media_dir: &Path,
    thumbnail_dir: &Path,
    request: &UploadFromUrlRequest,
) -> Result<UploadResponse> {
    let response = client
        .get(&request.url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| bad_gateway(format!("unable to download {}: {e}", request.url)))?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_owned();

    if !content_type.starts_with("image/") {
        return Err(bad_request(format!(
            "URL did not point to an image (content type {content_type:?})"
        )));
    }

    let name = response
        .url()
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or("")
        .to_owned();

    let content = response
        .bytes()
        .await
        .map_err(|e| bad_gateway(format!("unable to download {}: {e}", request.url)))?;

    // Prefer the extension in the URL path; fall back to the content type's subtype.
    let (filename, hash) = media::content_address(&name, &content).or_else(|_| {
        let subtype = content_type.rsplit('/').next().unwrap_or("");

        media::content_address(&format!("download.{subtype}"), &content)
    })?;

    if sqlx::query("SELECT 1 FROM images WHERE hash = ?1")
        .bind(&hash)
        .fetch_optional(&mut *conn)
        .await?
        .is_some()
    {
        return Ok(UploadResponse {
            uploaded: 0,
            duplicates: 1,
            failed: 0,
            message: "an identical image is already in the gallery".into(),
        });
    }

    let tags = request
        .tags
        .iter()
        .filter_map(|s| s.parse::<Tag>().ok())
        .collect::<BTreeSet<_>>();

    let ids = crate::tags::get_or_create_tags(conn, &tags).await?;

    media::store_image(media_dir, thumbnail_dir, &filename, &content).await?;

    let image_id = sqlx::query("INSERT INTO images (filename, hash, created_at) VALUES (?1, ?2, ?3)")
        .bind(&filename)
        .bind(&hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    for id in ids.values() {
        sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)")
            .bind(image_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    info!("stored {filename} downloaded from {}", request.url);

    Ok(UploadResponse {
        uploaded: 1,
        duplicates: 0,
        failed: 0,
        message: "image downloaded and stored".into(),
    })
}
