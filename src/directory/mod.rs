//! Activation directory — key to activation resolution.
//!
//! - `ActivationDirectory` — resolve-or-create used by the prober
//! - `DeactivationListener` — drain-completion callback used by activations
//! - `local` — in-process table honoring one activation per key

pub mod local;

use async_trait::async_trait;
use uuid::Uuid;

use crate::activation::ActivationHandle;
use crate::error::DirectoryError;

pub use local::LocalDirectory;

/// Resolves a key to its single live activation, creating one on a miss.
#[async_trait]
pub trait ActivationDirectory: Send + Sync {
    async fn resolve_or_create(&self, key: &str) -> Result<ActivationHandle, DirectoryError>;
}

/// Notified once an activation has fully drained.
#[async_trait]
pub trait DeactivationListener: Send + Sync {
    async fn on_deactivated(&self, key: &str, id: Uuid);
}
