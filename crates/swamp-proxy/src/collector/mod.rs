//! Viewer collector client.
//!
//! The collector tracks running viewer VMs. The proxy asks it where the VM
//! behind a proxy id lives and which project it serves.

mod error;
mod htcondor;

use async_trait::async_trait;
use serde::Serialize;

pub use error::{CollectorError, CollectorResult};
pub use htcondor::HtCondorCollector;

/// Address and project reported for a proxy id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerData {
    /// VM address, absent while the VM is still launching.
    pub vm_address: Option<String>,
    pub project_id: Option<String>,
}

/// Launch state of a viewer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerInstanceStatus {
    pub viewer_instance_uuid: String,
    pub state: Option<String>,
    pub status: Option<String>,
    pub proxy_url: Option<String>,
}

/// Query interface to the collector.
#[async_trait]
pub trait ViewerCollector: Send + Sync {
    /// Look up the VM address and project for a proxy id.
    async fn get_viewer_data(&self, proxy_id: &str) -> CollectorResult<ViewerData>;

    /// Look up the launch state of a viewer instance. `None` if the collector has no ad for it.
    async fn get_viewer_instance(
        &self,
        viewer_instance_uuid: &str,
    ) -> CollectorResult<Option<ViewerInstanceStatus>>;
}
