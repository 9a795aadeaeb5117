//! Advisory lease guarding a target against concurrent attempts
//!
//! The lease is a directory on the host created with plain `mkdir`, which is
//! atomic, holding an `owner.json` that names the attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::DeployError;
use crate::remote::RemoteExecutor;
use crate::storage::layout::RemoteLayout;
use crate::utils::operator_name;

/// Who holds the lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseOwner {
    pub attempt_id: Uuid,
    pub operator: String,
    /// Machine the attempt runs from
    pub origin: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LeaseOwner {
    /// Owner record for an attempt started by this process
    pub fn for_attempt(attempt_id: Uuid) -> Self {
        Self {
            attempt_id,
            operator: operator_name(),
            origin: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let age = now.signed_duration_since(self.acquired_at);
        age.to_std().map(|age| age > stale_after).unwrap_or(false)
    }

    pub fn describe(&self) -> String {
        format!(
            "attempt {} ({}@{}, pid {}, since {})",
            self.attempt_id,
            self.operator,
            self.origin,
            self.pid,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// A held lease. Call [`Lease::release`] on every exit path.
pub struct Lease {
    executor: Arc<dyn RemoteExecutor>,
    layout: RemoteLayout,
    owner: LeaseOwner,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("target", &self.executor.describe())
            .field("owner", &self.owner)
            .finish()
    }
}

async fn read_owner(
    executor: &dyn RemoteExecutor,
    layout: &RemoteLayout,
) -> Result<Option<LeaseOwner>, DeployError> {
    let contents = executor.read_file(&layout.lock_owner_file()).await?;
    Ok(contents.and_then(|c| serde_json::from_str(&c).ok()))
}

/// Take the lease, breaking it once if the current holder is stale
pub async fn acquire(
    executor: Arc<dyn RemoteExecutor>,
    layout: &RemoteLayout,
    owner: LeaseOwner,
    stale_after: Duration,
) -> Result<Lease, DeployError> {
    let lock_dir = layout.lock_dir();

    for _ in 0..2 {
        if executor.create_dir_exclusive(&lock_dir).await? {
            let body = serde_json::to_vec_pretty(&owner)?;
            if let Err(e) = executor
                .write_file_atomic(&layout.lock_owner_file(), &body)
                .await
            {
                let _ = executor.remove_path(&lock_dir).await;
                return Err(e);
            }
            info!("Acquired deployment lock on {}", executor.describe());
            return Ok(Lease {
                executor,
                layout: layout.clone(),
                owner,
            });
        }

        match read_owner(executor.as_ref(), layout).await? {
            Some(holder) if holder.is_stale(Utc::now(), stale_after) => {
                warn!("Breaking stale deployment lock held by {}", holder.describe());
                executor.remove_path(&lock_dir).await?;
            }
            Some(holder) => {
                return Err(DeployError::LockHeld {
                    owner: holder.describe(),
                });
            }
            None => {
                return Err(DeployError::LockHeld {
                    owner: format!(
                        "unknown owner ({} exists without a readable owner file; run `sparkdeploy unlock` if no attempt is running)",
                        lock_dir
                    ),
                });
            }
        }
    }

    Err(DeployError::LockHeld {
        owner: "a concurrent attempt".to_string(),
    })
}

/// Remove the lease regardless of who holds it
pub async fn force_release(
    executor: &dyn RemoteExecutor,
    layout: &RemoteLayout,
) -> Result<Option<LeaseOwner>, DeployError> {
    let holder = read_owner(executor, layout).await?;
    executor.remove_path(&layout.lock_dir()).await?;
    Ok(holder)
}

impl Lease {
    pub fn owner(&self) -> &LeaseOwner {
        &self.owner
    }

    /// Release the lease if it is still ours
    pub async fn release(self) -> Result<(), DeployError> {
        release_if_owned(self.executor.as_ref(), &self.layout, self.owner.attempt_id).await
    }
}

/// Remove the lease only when its owner file names `attempt_id`. Also used
/// to clean up after an acquisition that was interrupted part way.
pub async fn release_if_owned(
    executor: &dyn RemoteExecutor,
    layout: &RemoteLayout,
    attempt_id: Uuid,
) -> Result<(), DeployError> {
    match read_owner(executor, layout).await? {
        Some(holder) if holder.attempt_id == attempt_id => {
            executor.remove_path(&layout.lock_dir()).await?;
            debug!("Released deployment lock on {}", executor.describe());
        }
        Some(holder) => {
            warn!(
                "Deployment lock now belongs to {}; leaving it in place",
                holder.describe()
            );
        }
        None => {
            debug!("No deployment lock of ours on {}", executor.describe());
        }
    }
    Ok(())
}
