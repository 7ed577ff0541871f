use std::sync::Arc;

use crate::config::AppConfig;
use crate::store::FileStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<FileStore>,
}
