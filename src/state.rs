//! Shared state handed to every handler.

use crate::{
    config::AppConfig,
    services::{object_store::ObjectStore, rate_limiter::RateLimiter, reaper::Reaper},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: ObjectStore,
    pub limiter: RateLimiter,
    pub reaper: Reaper,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: ObjectStore, limiter: RateLimiter, config: AppConfig) -> Self {
        let reaper = Reaper::new(store.clone(), limiter.clone());
        Self {
            store,
            limiter,
            reaper,
            config: Arc::new(config),
        }
    }
}
