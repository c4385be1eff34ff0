use std::sync::Arc;

use labgate_server::config::Settings;
use labgate_server::store::{MemoryStore, PgStore, Store};
use labgate_server::{io, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let settings = Settings::load()?;
    io::prepare_io(&settings.data_dir).await?;

    let store: Arc<dyn Store> = match &settings.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await.map_err(|err| anyhow::anyhow!("{:?}", err))?),
        None => {
            log::warn!("No database_url configured, keeping all data in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = settings.bind_address;
    let app = routes::router(AppState::new(store, settings));

    log::info!("Starting LabGate HTTP Server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
