#![deny(warnings)]

use {
    crate::warp_util::HttpError,
    anyhow::{anyhow, Result},
    bytes::BufMut,
    futures::{future::FutureExt, TryFutureExt, TryStreamExt},
    http::{
        header,
        response::{self, Response},
    },
    hyper::Body,
    serde::Serialize,
    sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqliteConnection},
    std::{
        convert::Infallible,
        net::SocketAddrV4,
        ops::DerefMut,
        panic::{self, AssertUnwindSafe},
        sync::Arc,
    },
    structopt::StructOpt,
    tokio::sync::Mutex as AsyncMutex,
    tracing::{info, warn},
    warp::{Filter, Rejection, Reply},
};

pub use undo::{FileUndoStore, UndoStore};

mod batch;
mod images;
mod media;
mod schema;
mod tags;
mod undo;
mod warp_util;

const MAX_UPLOAD_LENGTH: u64 = 100 * 1024 * 1024;

#[derive(StructOpt, Debug)]
#[structopt(name = "booru-server", about = "Self-hosted image gallery backend")]
pub struct Options {
    /// Address to which to bind
    #[structopt(long)]
    pub address: SocketAddrV4,

    /// Directory in which to store uploaded images
    #[structopt(long)]
    pub media_directory: String,

    /// Directory in which to store generated thumbnails
    #[structopt(long)]
    pub thumbnail_directory: String,

    /// SQLite database to create or reuse
    #[structopt(long)]
    pub state_file: String,

    /// File in which to persist the most recent batch operation for undo
    #[structopt(long)]
    pub undo_file: String,

    /// Directory containing static resources
    #[structopt(long)]
    pub public_directory: String,

    /// File containing TLS certificate to use
    #[structopt(long)]
    pub cert_file: Option<String>,

    /// File containing TLS key to use
    #[structopt(long)]
    pub key_file: Option<String>,
}

pub async fn open(state_file: &str) -> Result<SqliteConnection> {
    let mut conn = format!("sqlite://{state_file}")
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .connect()
        .await?;

    for statement in schema::DDL_STATEMENTS {
        sqlx::query(statement).execute(&mut conn).await?;
    }

    Ok(conn)
}

fn response() -> response::Builder {
    Response::builder()
}

fn json(value: &impl Serialize) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value)?;

    Ok(response()
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

fn reject(context: &'static str) -> impl Fn(anyhow::Error) -> Rejection {
    move |e| {
        warn!("error {context}: {e:?}");

        Rejection::from(HttpError::from_anyhow(&e))
    }
}

pub fn routes(
    conn: &Arc<AsyncMutex<SqliteConnection>>,
    undo: &Arc<dyn UndoStore>,
    options: &Arc<Options>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let search_images = warp::get()
        .and(warp::path!("api" / "images"))
        .and(warp::query::<booru_shared::ImagesQuery>())
        .and_then({
            let conn = conn.clone();

            move |query| {
                let conn = conn.clone();

                async move { json(&images::search(conn.lock().await.deref_mut(), &query).await?) }
                    .map_err(reject("searching images"))
            }
        });

    let batch_tag = warp::post()
        .and(warp::path!("api" / "images" / "batch_tag"))
        .and(warp::body::json::<booru_shared::BatchTagRequest>())
        .and_then({
            let conn = conn.clone();
            let undo = undo.clone();

            move |body| {
                let conn = conn.clone();
                let undo = undo.clone();

                async move {
                    json(
                        &batch::batch_tag(conn.lock().await.deref_mut(), undo.as_ref(), &body)
                            .await?,
                    )
                }
                .map_err(reject("applying batch tag operation"))
            }
        });

    let batch_undo = warp::post()
        .and(warp::path!("api" / "images" / "batch_undo"))
        .and_then({
            let conn = conn.clone();
            let undo = undo.clone();

            move || {
                let conn = conn.clone();
                let undo = undo.clone();

                async move {
                    json(&batch::undo_last(conn.lock().await.deref_mut(), undo.as_ref()).await?)
                }
                .map_err(reject("undoing batch tag operation"))
            }
        });

    let batch_delete = warp::post()
        .and(warp::path!("api" / "images" / "batch_delete"))
        .and(warp::body::json::<booru_shared::BatchDeleteRequest>())
        .and_then({
            let conn = conn.clone();
            let undo = undo.clone();
            let options = options.clone();

            move |body| {
                let conn = conn.clone();
                let undo = undo.clone();
                let options = options.clone();

                async move {
                    json(
                        &batch::batch_delete(
                            conn.lock().await.deref_mut(),
                            undo.as_ref(),
                            options.media_directory.as_ref(),
                            options.thumbnail_directory.as_ref(),
                            &body,
                        )
                        .await?,
                    )
                }
                .map_err(reject("deleting images"))
            }
        });

    let update_tags = warp::put()
        .and(warp::path!("api" / "image" / i64 / "tags"))
        .and(warp::body::json::<booru_shared::UpdateTagsRequest>())
        .and_then({
            let conn = conn.clone();

            move |image_id, body| {
                let conn = conn.clone();

                async move {
                    json(
                        &tags::update_image_tags(conn.lock().await.deref_mut(), image_id, &body)
                            .await?,
                    )
                }
                .map_err(reject("updating image tags"))
            }
        });

    let upload = warp::post()
        .and(warp::path!("api" / "upload"))
        .and(warp::multipart::form().max_length(MAX_UPLOAD_LENGTH))
        .and_then({
            let conn = conn.clone();
            let options = options.clone();

            move |mut form: warp::multipart::FormData| {
                let conn = conn.clone();
                let options = options.clone();

                async move {
                    let mut files = Vec::new();
                    let mut initial_tags = String::new();

                    while let Some(part) = form.try_next().await? {
                        let filename = part.filename().map(str::to_owned);
                        let is_tags = part.name() == "tags";

                        let content = part
                            .stream()
                            .try_fold(Vec::new(), |mut content, buf| async move {
                                content.put(buf);

                                Ok(content)
                            })
                            .await?;

                        if let Some(filename) = filename {
                            files.push((filename, content));
                        } else if is_tags {
                            initial_tags = String::from_utf8_lossy(&content).into_owned();
                        }
                    }

                    json(
                        &images::upload(
                            conn.lock().await.deref_mut(),
                            options.media_directory.as_ref(),
                            options.thumbnail_directory.as_ref(),
                            files,
                            &booru_shared::tag_expression::parse_tag_list(&initial_tags),
                        )
                        .await?,
                    )
                }
                .map_err(reject("storing uploads"))
            }
        });

    let upload_from_url = warp::post()
        .and(warp::path!("api" / "upload_from_url"))
        .and(warp::body::json::<booru_shared::UploadFromUrlRequest>())
        .and_then({
            let conn = conn.clone();
            let options = options.clone();
            let client = reqwest::Client::new();

            move |body: booru_shared::UploadFromUrlRequest| {
                let conn = conn.clone();
                let options = options.clone();
                let client = client.clone();

                async move {
                    json(
                        &images::upload_from_url(
                            conn.lock().await.deref_mut(),
                            &client,
                            options.media_directory.as_ref(),
                            options.thumbnail_directory.as_ref(),
                            &body,
                        )
                        .await?,
                    )
                }
                .map_err(reject("storing download"))
            }
        });

    let tags_summary = warp::get()
        .and(warp::path!("api" / "tags" / "summary"))
        .and_then({
            let conn = conn.clone();

            move || {
                let conn = conn.clone();

                async move { json(&tags::summary(conn.lock().await.deref_mut()).await?) }
                    .map_err(reject("summarizing tags"))
            }
        });

    let tags_search = warp::get()
        .and(warp::path!("api" / "tags" / "search"))
        .and(warp::query::<booru_shared::TagsSearchQuery>())
        .and_then({
            let conn = conn.clone();

            move |query| {
                let conn = conn.clone();

                async move { json(&tags::search(conn.lock().await.deref_mut(), &query).await?) }
                    .map_err(reject("searching tags"))
            }
        });

    let autocomplete = warp::get()
        .and(warp::path!("api" / "tags" / "autocomplete"))
        .and(warp::query::<booru_shared::AutocompleteQuery>())
        .and_then({
            let conn = conn.clone();

            move |query| {
                let conn = conn.clone();

                async move {
                    json(&tags::autocomplete(conn.lock().await.deref_mut(), &query).await?)
                }
                .map_err(reject("autocompleting tags"))
            }
        });

    let recent_tags = warp::get()
        .and(warp::path!("api" / "tags" / "recent"))
        .and(warp::query::<booru_shared::RecentTagsQuery>())
        .and_then({
            let conn = conn.clone();

            move |query: booru_shared::RecentTagsQuery| {
                let conn = conn.clone();

                async move {
                    json(&tags::recent(conn.lock().await.deref_mut(), query.limit).await?)
                }
                .map_err(reject("listing recent tags"))
            }
        });

    let rename_tag = warp::post()
        .and(warp::path!("api" / "tags" / "rename" / i64))
        .and(warp::body::json::<booru_shared::RenameTagRequest>())
        .and_then({
            let conn = conn.clone();

            move |tag_id, body: booru_shared::RenameTagRequest| {
                let conn = conn.clone();

                async move {
                    json(&tags::rename(conn.lock().await.deref_mut(), tag_id, &body.new_name).await?)
                }
                .map_err(reject("renaming tag"))
            }
        });

    let change_category = warp::post()
        .and(warp::path!("api" / "tags" / "change_category" / i64))
        .and(warp::body::json::<booru_shared::ChangeCategoryRequest>())
        .and_then({
            let conn = conn.clone();

            move |tag_id, body: booru_shared::ChangeCategoryRequest| {
                let conn = conn.clone();

                async move {
                    json(
                        &tags::change_category(
                            conn.lock().await.deref_mut(),
                            tag_id,
                            body.new_category,
                        )
                        .await?,
                    )
                }
                .map_err(reject("changing tag category"))
            }
        });

    let merge_tags = warp::post()
        .and(warp::path!("api" / "tags" / "merge"))
        .and(warp::body::json::<booru_shared::MergeTagsRequest>())
        .and_then({
            let conn = conn.clone();

            move |body: booru_shared::MergeTagsRequest| {
                let conn = conn.clone();

                async move {
                    json(
                        &tags::merge(conn.lock().await.deref_mut(), body.keep_id, body.delete_id)
                            .await?,
                    )
                }
                .map_err(reject("merging tags"))
            }
        });

    let delete_orphans = warp::post()
        .and(warp::path!("api" / "tags" / "delete_orphans"))
        .and_then({
            let conn = conn.clone();

            move || {
                let conn = conn.clone();

                async move { json(&tags::delete_orphans(conn.lock().await.deref_mut()).await?) }
                    .map_err(reject("deleting orphan tags"))
            }
        });

    let delete_image = warp::delete()
        .and(warp::path!("api" / "image" / i64))
        .and_then({
            let conn = conn.clone();
            let undo = undo.clone();
            let options = options.clone();

            move |image_id| {
                let conn = conn.clone();
                let undo = undo.clone();
                let options = options.clone();

                async move {
                    let deleted = batch::batch_delete(
                        conn.lock().await.deref_mut(),
                        undo.as_ref(),
                        options.media_directory.as_ref(),
                        options.thumbnail_directory.as_ref(),
                        &booru_shared::BatchDeleteRequest {
                            image_ids: vec![image_id],
                        },
                    )
                    .await?;

                    if deleted.affected == 0 {
                        return Err(warp_util::not_found("image not found"));
                    }

                    json(&booru_shared::ActionMessage {
                        message: "image deleted".into(),
                    })
                }
                .map_err(reject("deleting image"))
            }
        });

    let delete_tag = warp::delete()
        .and(warp::path!("api" / "tag" / i64))
        .and_then({
            let conn = conn.clone();

            move |tag_id| {
                let conn = conn.clone();

                async move { json(&tags::force_delete(conn.lock().await.deref_mut(), tag_id).await?) }
                    .map_err(reject("deleting tag"))
            }
        });

    search_images
        .or(tags_summary)
        .or(tags_search)
        .or(autocomplete)
        .or(recent_tags)
        .or(batch_tag)
        .or(batch_undo)
        .or(batch_delete)
        .or(update_tags)
        .or(upload)
        .or(upload_from_url)
        .or(rename_tag)
        .or(change_category)
        .or(merge_tags)
        .or(delete_orphans)
        .or(delete_image)
        .or(delete_tag)
        .or(warp::path("media").and(warp::fs::dir(options.media_directory.clone())))
        .or(warp::path("thumbnails").and(warp::fs::dir(options.thumbnail_directory.clone())))
        .or(warp::fs::dir(options.public_directory.clone()))
        .recover(warp_util::handle_rejection)
        .with(warp::log("booru"))
}

fn catch_unwind<T>(fun: impl panic::UnwindSafe + FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(fun).map_err(|e| {
        if let Some(s) = e.downcast_ref::<&str>() {
            anyhow!("{s}")
        } else if let Some(s) = e.downcast_ref::<String>() {
            anyhow!("{s}")
        } else {
            anyhow!("caught panic")
        }
    })
}

pub async fn serve(
    conn: &Arc<AsyncMutex<SqliteConnection>>,
    undo: &Arc<dyn UndoStore>,
    options: &Arc<Options>,
) -> Result<()> {
    let routes = routes(conn, undo, options);

    let (address, future) = if let (Some(cert), Some(key)) = (&options.cert_file, &options.key_file)
    {
        let server = warp::serve(routes).tls().cert_path(cert).key_path(key);

        // As of this writing, warp::TlsServer does not have a try_bind_ephemeral method, so we must catch panics
        // explicitly.
        let (address, future) = catch_unwind(AssertUnwindSafe(move || {
            server.bind_ephemeral(options.address)
        }))?;

        (address, future.boxed())
    } else {
        let (address, future) = warp::serve(routes).try_bind_ephemeral(options.address)?;

        (address, future.boxed())
    };

    info!("listening on {address}");

    future.await;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_util {
    use {
        super::*,
        booru_shared::tag_expression::parse_tag_list,
        chrono::Utc,
    };

    pub async fn connect() -> Result<SqliteConnection> {
        let mut conn = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()?
            .connect()
            .await?;

        for statement in schema::DDL_STATEMENTS {
            sqlx::query(statement).execute(&mut conn).await?;
        }

        Ok(conn)
    }

    pub async fn add_image(conn: &mut SqliteConnection, filename: &str) -> Result<i64> {
        Ok(
            sqlx::query("INSERT INTO images (filename, hash, created_at) VALUES (?1, ?2, ?3)")
                .bind(filename)
                .bind(filename)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *conn)
                .await?
                .last_insert_rowid(),
        )
    }

    pub async fn tag_image(conn: &mut SqliteConnection, image_id: i64, tags: &str) -> Result<()> {
        let ids = crate::tags::get_or_create_tags(conn, &parse_tag_list(tags)).await?;

        for id in ids.values() {
            sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)")
                .bind(image_id)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            test_util::{add_image, connect, tag_image},
            undo::MemoryUndoStore,
        },
        booru_shared::{
            tag_expression::Tag, ActionMessage, BatchAction, BatchTagRequest, BatchTagResponse,
            ImagesResponse, MergeTagsRequest, RenameTagRequest, TagsSummaryResponse,
            UndoResponse, UpdateTagsRequest, UpdateTagsResponse, UploadResponse,
        },
        http::status::StatusCode,
        std::sync::Once,
        tempfile::TempDir,
    };

    struct TestState<F> {
        conn: Arc<AsyncMutex<SqliteConnection>>,
        undo: Arc<MemoryUndoStore>,
        routes: F,
        _media_dir: TempDir,
        _thumbnail_dir: TempDir,
    }

    fn tag(s: &str) -> Tag {
        s.parse().unwrap()
    }

    async fn init(
    ) -> Result<TestState<impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone>> {
        {
            static ONCE: Once = Once::new();

            ONCE.call_once(pretty_env_logger::init_timed);
        }

        let conn = Arc::new(AsyncMutex::new(connect().await?));

        let media_dir = TempDir::new()?;
        let thumbnail_dir = TempDir::new()?;

        let undo = Arc::new(MemoryUndoStore::default());

        let options = Arc::new(Options {
            address: "0.0.0.0:0".parse()?,
            media_directory: media_dir
                .path()
                .to_str()
                .ok_or_else(|| anyhow!("invalid UTF-8"))?
                .to_owned(),
            thumbnail_directory: thumbnail_dir
                .path()
                .to_str()
                .ok_or_else(|| anyhow!("invalid UTF-8"))?
                .to_owned(),
            state_file: "does-not-exist-61c4ae4f-a1ee-4a43-9808-95c4a45cd035".to_owned(),
            undo_file: "does-not-exist-61c4ae4f-a1ee-4a43-9808-95c4a45cd035".to_owned(),
            public_directory: "does-not-exist-61c4ae4f-a1ee-4a43-9808-95c4a45cd035".to_owned(),
            cert_file: None,
            key_file: None,
        });

        let routes = routes(&conn, &(undo.clone() as Arc<dyn UndoStore>), &options);

        Ok(TestState {
            conn,
            undo,
            routes,
            _media_dir: media_dir,
            _thumbnail_dir: thumbnail_dir,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn search_endpoint() -> Result<()> {
        let TestState { conn, routes, .. } = init().await?;

        {
            let mut conn = conn.lock().await;

            let a = add_image(conn.deref_mut(), "a.jpg").await?;
            let b = add_image(conn.deref_mut(), "b.jpg").await?;
            tag_image(conn.deref_mut(), a, "sunset, beach").await?;
            tag_image(conn.deref_mut(), b, "sunset, artist:someone").await?;
        }

        let response = warp::test::request()
            .method("GET")
            .path("/api/images?q=sunset&limit=1")
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());

        let body = serde_json::from_slice::<ImagesResponse>(response.body())?;

        assert_eq!(2, body.total);
        assert_eq!(1, body.images.len());
        assert!(body.has_more);
        assert_eq!(
            vec![tag("sunset"), tag("artist:someone")],
            body.images[0].tags
        );

        let response = warp::test::request()
            .method("GET")
            .path("/api/images?q=artist%3Asomeone")
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());
        assert_eq!(
            1,
            serde_json::from_slice::<ImagesResponse>(response.body())?.total
        );

        // Unknown paths are JSON 404s.
        let response = warp::test::request()
            .method("GET")
            .path("/api/nonesuch")
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::NOT_FOUND, response.status());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn batch_endpoints() -> Result<()> {
        let TestState {
            conn,
            routes,
            undo,
            ..
        } = init().await?;

        let (a, b) = {
            let mut conn = conn.lock().await;

            let a = add_image(conn.deref_mut(), "a.jpg").await?;
            let b = add_image(conn.deref_mut(), "b.jpg").await?;
            tag_image(conn.deref_mut(), a, "red").await?;

            (a, b)
        };

        // Empty image_ids is a 400.
        let response = warp::test::request()
            .method("POST")
            .path("/api/images/batch_tag")
            .json(&BatchTagRequest {
                image_ids: vec![],
                action: BatchAction::Add,
                tags: "red".into(),
            })
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::BAD_REQUEST, response.status());

        let response = warp::test::request()
            .method("POST")
            .path("/api/images/batch_tag")
            .json(&BatchTagRequest {
                image_ids: vec![a, b],
                action: BatchAction::Add,
                tags: "blue, character:alice".into(),
            })
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());

        let body = serde_json::from_slice::<BatchTagResponse>(response.body())?;

        assert_eq!(2, body.affected);
        assert!(body.undo_available);
        assert!(undo.current().is_some());

        let response = warp::test::request()
            .method("POST")
            .path("/api/images/batch_undo")
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());

        let body = serde_json::from_slice::<UndoResponse>(response.body())?;

        assert!(body.undone);
        assert_eq!(2, body.restored);

        // The slot is consumed; a second undo reports nothing to do.
        let response = warp::test::request()
            .method("POST")
            .path("/api/images/batch_undo")
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());
        assert!(!serde_json::from_slice::<UndoResponse>(response.body())?.undone);

        let response = warp::test::request()
            .method("GET")
            .path("/api/images?q=blue")
            .reply(&routes)
            .await;

        assert_eq!(
            0,
            serde_json::from_slice::<ImagesResponse>(response.body())?.total
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn single_image_tag_editing() -> Result<()> {
        let TestState { conn, routes, .. } = init().await?;

        let image = {
            let mut conn = conn.lock().await;

            let image = add_image(conn.deref_mut(), "a.jpg").await?;
            tag_image(conn.deref_mut(), image, "red").await?;

            image
        };

        let response = warp::test::request()
            .method("PUT")
            .path(&format!("/api/image/{image}/tags"))
            .json(&UpdateTagsRequest {
                tags: vec!["blue".into(), "artist:someone".into()],
            })
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());
        assert_eq!(
            vec![tag("blue"), tag("artist:someone")],
            serde_json::from_slice::<UpdateTagsResponse>(response.body())?.tags
        );

        // A missing image is a 404.
        let response = warp::test::request()
            .method("PUT")
            .path("/api/image/999/tags")
            .json(&UpdateTagsRequest { tags: vec![] })
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::NOT_FOUND, response.status());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn tag_maintenance_endpoints() -> Result<()> {
        let TestState { conn, routes, .. } = init().await?;

        {
            let mut conn = conn.lock().await;

            let a = add_image(conn.deref_mut(), "a.jpg").await?;
            tag_image(conn.deref_mut(), a, "red, crimson").await?;
        }

        let response = warp::test::request()
            .method("GET")
            .path("/api/tags/summary")
            .reply(&routes)
            .await;

        let tags = serde_json::from_slice::<TagsSummaryResponse>(response.body())?.tags;
        assert_eq!(2, tags.len());

        let crimson = tags.iter().find(|t| t.name == "crimson").unwrap().id;
        let red = tags.iter().find(|t| t.name == "red").unwrap().id;

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/api/tags/rename/{crimson}"))
            .json(&RenameTagRequest {
                new_name: "red".into(),
            })
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::BAD_REQUEST, response.status());

        let response = warp::test::request()
            .method("POST")
            .path("/api/tags/merge")
            .json(&MergeTagsRequest {
                keep_id: red,
                delete_id: crimson,
            })
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());
        serde_json::from_slice::<ActionMessage>(response.body())?;

        let response = warp::test::request()
            .method("GET")
            .path("/api/tags/summary")
            .reply(&routes)
            .await;

        let tags = serde_json::from_slice::<TagsSummaryResponse>(response.body())?.tags;
        assert_eq!(1, tags.len());
        assert_eq!("red", tags[0].name);
        assert_eq!(1, tags[0].count);

        let response = warp::test::request()
            .method("DELETE")
            .path(&format!("/api/tag/{red}"))
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());

        let response = warp::test::request()
            .method("GET")
            .path("/api/tags/summary")
            .reply(&routes)
            .await;

        assert!(serde_json::from_slice::<TagsSummaryResponse>(response.body())?
            .tags
            .is_empty());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn upload_endpoint() -> Result<()> {
        let TestState { routes, .. } = init().await?;

        let content = {
            let mut encoded = std::io::Cursor::new(Vec::new());

            image::RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 255]))
                .write_to(&mut encoded, image::ImageOutputFormat::Png)?;

            encoded.into_inner()
        };

        let boundary = "------------------------booru-test-boundary";

        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\ncontent-disposition: form-data; name=\"files\"; \
                 filename=\"tiny.png\"\r\ncontent-type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = warp::test::request()
            .method("POST")
            .path("/api/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(&body)
            .reply(&routes)
            .await;

        assert_eq!(StatusCode::OK, response.status());

        let body = serde_json::from_slice::<UploadResponse>(response.body())?;

        assert_eq!(1, body.uploaded);
        assert_eq!(0, body.failed);

        let response = warp::test::request()
            .method("GET")
            .path("/api/images?q=untagged")
            .reply(&routes)
            .await;

        assert_eq!(
            1,
            serde_json::from_slice::<ImagesResponse>(response.body())?.total
        );

        Ok(())
    }
}
