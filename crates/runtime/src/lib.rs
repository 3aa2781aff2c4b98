use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use parley_config::AppConfig;
use parley_delivery::{MessageStore, RetryQueue};
use parley_gateway::router::RoomDispatch;
use parley_gateway::GatewayState;
use parley_presence::PresenceDirectory;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::INFO)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct CoreServices {
    pub presence: Arc<PresenceDirectory>,
    pub store: Arc<MessageStore>,
    pub retries: Arc<RetryQueue<RoomDispatch>>,
    pub gateway: Arc<GatewayState>,
}

impl CoreServices {
    pub fn initialise(config: &AppConfig) -> Result<Self> {
        let presence = Arc::new(PresenceDirectory::new());
        let store = Arc::new(MessageStore::new(presence.clone()));
        let retries = Arc::new(RetryQueue::new(Duration::from_secs(
            config.retry.timeout_seconds,
        )));
        let gateway = Arc::new(GatewayState::new(
            presence.clone(),
            store.clone(),
            retries.clone(),
            config.chat.default_room.clone(),
        ));

        info!(
            default_room = %config.chat.default_room,
            retry_timeout_seconds = config.retry.timeout_seconds,
            "chat core ready"
        );

        Ok(Self {
            presence,
            store,
            retries,
            gateway,
        })
    }

    pub fn sweep_interval(config: &AppConfig) -> Duration {
        Duration::from_secs(config.retry.sweep_interval_seconds)
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn core_services_wire_shared_presence() {
        let config = AppConfig::default();
        let services = CoreServices::initialise(&config).expect("core should initialise");

        services
            .presence
            .join(parley_presence::ConnectionId::new(), "Alice", "general")
            .await;
        assert!(services.gateway.presence.is_reachable("alice").await);
        assert_eq!(
            services.retries.retry_timeout(),
            Duration::from_secs(config.retry.timeout_seconds)
        );
    }
}
