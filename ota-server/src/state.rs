use crate::config::AppConfig;
use crate::models::release::StatusReport;
use crate::services::catalog::Catalog;
use dashmap::DashMap;
use tokio::sync::RwLock;

pub struct AppState {
    pub config: AppConfig,
    pub catalog: RwLock<Catalog>,
    /// Received status reports, newest last, keyed by device id
    pub reports: DashMap<String, Vec<StatusReport>>,
}

impl AppState {
    pub fn new(config: AppConfig, catalog: Catalog) -> Self {
        Self {
            config,
            catalog: RwLock::new(catalog),
            reports: DashMap::new(),
        }
    }
}
