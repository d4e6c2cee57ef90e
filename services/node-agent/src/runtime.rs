//! The runtime seam: how workloads actually execute on this node.

use anyhow::Result;
use async_trait::async_trait;
use keel_api::Object;

/// What the runtime observes about a started workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    Succeeded,
    Failed(String),
}

/// Executes workloads on the host. The sync loop drives phase
/// transitions off this interface; swapping the runtime never touches
/// the control flow.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    async fn start(&self, workload: &Object) -> Result<()>;

    async fn stop(&self, workload: &Object) -> Result<()>;

    /// Current state of a previously started workload.
    async fn poll(&self, workload: &Object) -> Result<RuntimeState>;
}

/// A runtime that runs nothing: every started workload reports Running
/// until stopped. Useful for soak-testing the control plane and as the
/// default until a real executor is wired in.
pub struct NullRuntime;

#[async_trait]
impl WorkloadRuntime for NullRuntime {
    async fn start(&self, _workload: &Object) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _workload: &Object) -> Result<()> {
        Ok(())
    }

    async fn poll(&self, _workload: &Object) -> Result<RuntimeState> {
        Ok(RuntimeState::Running)
    }
}
