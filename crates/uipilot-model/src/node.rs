use std::sync::Arc;
use std::sync::OnceLock;

use crate::event::EventSource;
use crate::geometry::Rect;
use crate::value::UiValue;

pub type NodeRef = Arc<dyn UiNode>;

/// A live element in the application's UI tree.
///
/// Implementations are owned by the application. The control host only
/// touches them on the UI thread, but references travel through the host's
/// dispatch queue, hence the `Send + Sync` bound.
pub trait UiNode: Send + Sync {
    /// Declared type name, e.g. `"Button"`. Matched by type query segments
    /// and used as the prefix of minted identities.
    fn type_name(&self) -> &str;

    /// Developer-assigned name, if any. Matched by name query segments.
    fn assigned_name(&self) -> Option<String>;

    /// Slot the host stamps an identity into. Must return the same slot for
    /// the lifetime of the node.
    fn identity_slot(&self) -> &OnceLock<String>;

    fn parent(&self) -> Option<NodeRef>;

    fn children(&self) -> Vec<NodeRef>;

    /// Reads a property by key. `None` when the node has no such property.
    fn property(&self, key: &str) -> Option<UiValue>;

    /// Writes a property. Returns false when the node has no such property
    /// or rejects the value.
    fn set_property(&self, key: &str, value: UiValue) -> bool;

    fn event(&self, name: &str) -> Option<Arc<EventSource>>;

    /// Bounding box in window coordinates.
    fn bounds(&self) -> Rect;

    fn focusable(&self) -> bool {
        false
    }
}

/// True when both refs point at the same live object.
pub fn same_node(a: &NodeRef, b: &NodeRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Depth-first pre-order walk of everything below `root`, excluding `root`
/// itself. Index query segments select against this order.
pub fn descendants(root: &NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeRef> = root.children();
    stack.reverse();
    while let Some(node) = stack.pop() {
        let mut kids = node.children();
        kids.reverse();
        out.push(node);
        stack.extend(kids);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Widget;

    #[test]
    fn test_descendants_pre_order() {
        let root = Widget::build("Window").finish();
        let a = Widget::build("Grid").name("A").finish();
        let a1 = Widget::build("Button").name("A1").finish();
        let a2 = Widget::build("Button").name("A2").finish();
        let b = Widget::build("Grid").name("B").finish();
        Widget::add_child(&a, a1);
        Widget::add_child(&a, a2);
        Widget::add_child(&root, a);
        Widget::add_child(&root, b);

        let root: NodeRef = root;
        let names: Vec<_> = descendants(&root)
            .iter()
            .map(|n| n.assigned_name().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["A", "A1", "A2", "B"]);
    }

    #[test]
    fn test_descendants_excludes_root() {
        let root: NodeRef = Widget::build("Window").name("Root").finish();
        assert!(descendants(&root).is_empty());
    }

    #[test]
    fn test_same_node_is_pointer_identity() {
        let a: NodeRef = Widget::build("Button").finish();
        let b: NodeRef = Widget::build("Button").finish();
        let a_again = Arc::clone(&a);
        assert!(same_node(&a, &a_again));
        assert!(!same_node(&a, &b));
    }
}
