//! Application state.

use std::sync::Arc;

use pixlift_billing::BillingService;
use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt: JwtManager,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let jwt = JwtManager::new(&config.jwt_secret, 24);
        let billing = Arc::new(BillingService::from_env(pool.clone())?);

        Ok(Self {
            pool,
            config,
            jwt,
            billing,
        })
    }
}
