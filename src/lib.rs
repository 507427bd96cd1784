pub mod ansible;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod lock;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod run;
pub mod webhook;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use config::LongshotConfig;
use dispatch::EventDispatcher;

pub struct AppState {
    pub config: Arc<LongshotConfig>,
    pub dispatcher: EventDispatcher,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Arc<LongshotConfig>, dispatcher: EventDispatcher) -> Self {
        Self {
            config,
            dispatcher,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
