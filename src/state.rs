use crate::application::ApplicationRegistry;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use std::sync::Arc;

/// Application state shared across handlers
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub registry: ApplicationRegistry,
    pub config: Arc<Config>,
}
