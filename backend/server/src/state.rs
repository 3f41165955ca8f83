use std::{error::Error, sync::Arc};

use tracing::info;

use super::{
    auth::{HttpVerifier, IdentityVerifier},
    config::{Config, StoreBackend},
    database::{RedisStore, init_redis},
    store::{MemoryStore, RecordStore},
};

pub struct State {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl State {
    pub async fn new() -> Result<Arc<Self>, Box<dyn Error + Send + Sync>> {
        let config = Config::load();

        let store: Arc<dyn RecordStore> = match config.store_backend {
            StoreBackend::Redis => {
                let connection = init_redis(&config.redis_url).await?;
                Arc::new(RedisStore::new(connection))
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        info!("Record store backend: {}", store.backend_tag());

        let verifier = Arc::new(HttpVerifier::new(
            config.verifier_url.clone(),
            config.verifier_timeout,
            config.verifier_key.clone(),
        )?);
        info!("Verifying tokens against {}", config.verifier_url);

        Ok(Self::with_parts(config, store, verifier))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn RecordStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            verifier,
        })
    }
}
