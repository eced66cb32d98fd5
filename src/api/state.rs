use std::sync::Arc;

use tokio::sync::Mutex;

use crate::run::registry::ProcessManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Mutex<ProcessManager>>,
}

impl AppState {
    pub fn new(manager: ProcessManager) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
        }
    }
}
