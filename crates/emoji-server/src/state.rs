use std::sync::Arc;

use emoji_engine::GenerationClient;

pub struct AppState {
    pub client: Arc<GenerationClient>,
}

impl AppState {
    pub fn new(client: Arc<GenerationClient>) -> Arc<Self> {
        Arc::new(Self { client })
    }
}
