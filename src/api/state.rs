use crate::service::OiService;

#[derive(Clone)]
pub struct AppState {
    pub service: OiService,
}

impl AppState {
    pub fn new(service: OiService) -> Self {
        Self { service }
    }
}
