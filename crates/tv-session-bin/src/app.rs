//! Component wiring shared by every subcommand.

use std::sync::Arc;

use credential_store::open_file_vault;
use http_gateway::{ApiClient, HttpGateway};
use session_lifecycle::{IdentityClient, LifecycleConfig, TokenLifecycleManager};
use tracing::{info, warn};
use tv_config_and_utils::{Config, Paths};

/// Session core for one CLI invocation.
pub struct App {
    pub config: Config,
    pub device_id: String,
    pub sessions: TokenLifecycleManager,
    pub api: Arc<ApiClient>,
}

impl App {
    /// Open the credential file, build the clients, and restore any stored session.
    pub async fn start(config: Config, paths: Paths) -> Result<Self, Box<dyn std::error::Error>> {
        paths.ensure_dirs()?;
        let vault = open_file_vault(&paths.credentials_file());

        let device_id = match &config.device_id {
            Some(id) => id.clone(),
            None => vault.device_id_or_create()?,
        };

        let base_url = config.api_base_url()?;
        let identity = IdentityClient::new(base_url.clone(), config.request_timeout());
        let sessions = TokenLifecycleManager::new(
            vault,
            Arc::new(identity),
            LifecycleConfig {
                refresh_timeout: config.refresh_timeout(),
                ..LifecycleConfig::default()
            },
        );

        match sessions.restore().await {
            Ok(true) => info!(device_id = %device_id, "Restored stored session"),
            Ok(false) => info!(device_id = %device_id, "No stored session"),
            Err(e) => warn!(error = %e, "Failed to restore session"),
        }

        let gateway = HttpGateway::new(base_url, config.request_timeout(), sessions.clone());

        Ok(Self {
            config,
            device_id,
            sessions,
            api: Arc::new(ApiClient::new(gateway)),
        })
    }

    /// Cancel renewal timers so the runtime can exit.
    pub fn shutdown(&self) {
        self.sessions.shutdown();
    }
}
