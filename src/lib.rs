pub mod auth;
pub mod config;
pub mod enrollment;
pub mod err;
pub mod gate;
pub mod io;
pub mod lifecycle;
pub mod models;
pub mod progress;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::Json;
use serde::Serialize;

use crate::config::Settings;
use crate::err::{Fine, Success};
use crate::store::Store;

pub use crate::err::Error;

pub type Payload<T> = axum::response::Result<Json<Success<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Fine(value)))
}

/// Shared by every handler through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, settings: Settings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }
}
