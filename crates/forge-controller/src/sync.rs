//! Hash-gated child resource synchronizer
//!
//! A child is created when absent, left alone when its stored hash matches
//! the freshly rendered one, and otherwise deleted and recreated. There is
//! no partial patching. A first create that loses a race counts as success,
//! as does a delete of an object that is already gone. A recreate that hits
//! an object still terminating is reported as a conflict so the whole pass
//! runs again. No call here retries.

use kube::Resource;
use tracing::{debug, info};

use forge_common::hash::{stamp_hash, stored_hash};
use forge_common::{Error, Result};

use crate::store::{KubeObject, ObjectStore};

/// What the synchronizer did to converge a child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Replaced,
    Unchanged,
}

/// A converged child and how it got there
#[derive(Clone, Debug)]
pub struct Synced<K> {
    pub outcome: SyncOutcome,
    /// Live object when known, otherwise the desired object
    pub object: K,
}

/// Converge the child named by `desired` onto `desired`
pub async fn sync_child<K: KubeObject>(
    store: &dyn ObjectStore<K>,
    mut desired: K,
) -> Result<Synced<K>> {
    let hash = stamp_hash(&mut desired)?;
    let kind = K::kind(&());
    let meta = desired.meta();
    let (Some(namespace), Some(name)) = (meta.namespace.clone(), meta.name.clone()) else {
        return Err(Error::internal_with_context(
            format!("desired {kind} is missing name or namespace"),
            "sync",
        ));
    };

    match store.get(&namespace, &name).await? {
        None => {
            let object = match store.create(&desired).await {
                Ok(created) => created,
                Err(Error::AlreadyExists { .. }) => {
                    debug!(kind = %kind, name = %name, "create raced with another writer");
                    desired
                }
                Err(e) => return Err(e),
            };
            info!(kind = %kind, namespace = %namespace, name = %name, "created child");
            Ok(Synced {
                outcome: SyncOutcome::Created,
                object,
            })
        }
        Some(existing) if stored_hash(&existing) == Some(hash.as_str()) => {
            debug!(kind = %kind, namespace = %namespace, name = %name, "child up to date");
            Ok(Synced {
                outcome: SyncOutcome::Unchanged,
                object: existing,
            })
        }
        Some(_) => {
            match store.delete(&namespace, &name).await {
                Ok(()) | Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            let object = match store.create(&desired).await {
                Ok(created) => created,
                // Old object still terminating (finalizers, background deletion)
                Err(Error::AlreadyExists { .. }) => {
                    debug!(kind = %kind, name = %name, "drifted child still terminating");
                    return Err(Error::conflict(kind.to_string(), name));
                }
                Err(e) => return Err(e),
            };
            info!(kind = %kind, namespace = %namespace, name = %name, "replaced drifted child");
            Ok(Synced {
                outcome: SyncOutcome::Replaced,
                object,
            })
        }
    }
}
