#![deny(warnings)]

use {
    anyhow::Result,
    booru_server::{FileUndoStore, Options, UndoStore},
    std::sync::Arc,
    structopt::StructOpt,
    tokio::{fs, sync::Mutex as AsyncMutex},
};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let options = Arc::new(Options::from_args());

    for directory in [&options.media_directory, &options.thumbnail_directory] {
        fs::create_dir_all(directory).await?;
    }

    let conn = Arc::new(AsyncMutex::new(booru_server::open(&options.state_file).await?));

    let undo: Arc<dyn UndoStore> = Arc::new(FileUndoStore::new(&options.undo_file));

    booru_server::serve(&conn, &undo, &options).await
}
