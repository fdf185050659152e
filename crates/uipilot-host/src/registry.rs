use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use uuid::Uuid;

use uipilot_common::mutex_lock_or_recover;
use uipilot_model::NodeRef;
use uipilot_model::UiNode;

use crate::error::ServiceError;

/// Maps wire identities to live elements.
///
/// An identity is minted the first time an element crosses the wire and is
/// stamped on the node itself, so the same element reports the same string
/// for as long as it lives. The table holds weak references only: a
/// released element stays listed but no longer resolves, and the host never
/// extends an element's lifetime on the remote side's behalf.
#[derive(Default)]
pub struct ElementRegistry {
    entries: Mutex<HashMap<String, Weak<dyn UiNode>>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the element's identity, minting one on first sight. The weak
    /// entry is refreshed on every call, so an element that was dropped and
    /// is being re-announced under a fresh `Arc` resolves again.
    pub fn get_or_assign(&self, node: &NodeRef) -> String {
        let identity = node
            .identity_slot()
            .get_or_init(|| mint_identity(node.type_name()))
            .clone();

        let mut entries = mutex_lock_or_recover(&self.entries);
        entries.insert(identity.clone(), Arc::downgrade(node));
        identity
    }

    pub fn resolve(&self, identity: &str) -> Result<NodeRef, ServiceError> {
        let entries = mutex_lock_or_recover(&self.entries);
        entries
            .get(identity)
            .and_then(Weak::upgrade)
            .ok_or_else(|| ServiceError::UnknownElement(identity.to_string()))
    }

    pub fn len(&self) -> usize {
        mutex_lock_or_recover(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn mint_identity(type_name: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}#{}", type_name, &hex[..12])
}
