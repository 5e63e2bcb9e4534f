pub mod cache;
pub mod schema;

use crate::config::Config;
use crate::services::SchemaContextService;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub service: SchemaContextService,
    pub config: Config,
}
