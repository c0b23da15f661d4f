use std::sync::Arc;

use crate::{
    config::ServerConfig, connector::ConnectorRegistry, signer::Signer, storage::Storage,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub storage: Arc<dyn Storage>,
    pub signer: Arc<dyn Signer>,
    pub connectors: Arc<ConnectorRegistry>,
    pub http_client: reqwest::Client,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
