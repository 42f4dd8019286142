use std::collections::HashMap;
use std::sync::Arc;

use gnm_common::types::{HostSpec, ServiceSpec};
use gnm_storage::MeasurementStore;

/// Shared state of the read API: the measurement store plus the catalogs,
/// loaded once at startup. The API never writes to either.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MeasurementStore>,
    pub hosts: Arc<HashMap<String, HostSpec>>,
    pub services: Arc<Vec<ServiceSpec>>,
}
