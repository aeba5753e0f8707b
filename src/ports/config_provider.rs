use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::ServerConfig;

/// Source of configuration that can be reloaded while the proxy runs.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the current configuration.
    async fn load_config(&self) -> Result<ServerConfig>;

    /// Change notifications; each message means `load_config` may now
    /// return something new. Only the first call gets the receiver.
    fn watch(&self) -> Option<mpsc::Receiver<()>>;
}
