use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Identifier prefix marking an in-memory document that is not subject to
/// path resolution.
pub const ANONYMOUS_IDENTIFIER_PREFIX: &str = "anon:";

/// Syntactic test for anonymous layer identifiers.
pub fn is_anonymous_layer_identifier(identifier: &str) -> bool {
    identifier.starts_with(ANONYMOUS_IDENTIFIER_PREFIX)
}

static NEXT_ANONYMOUS_SERIAL: AtomicU64 = AtomicU64::new(1);

struct LayerData {
    identifier: String,
    resolved_path: String,
    sublayers: RwLock<Vec<Layer>>,
}

/// Handle to an externally owned scene document.
///
/// Two handles are equal iff they refer to the same document object;
/// identifier strings play no part in equality or hashing. This is what makes
/// a `Layer` usable as a key in the registry's reverse indices: a document
/// re-opened under the same identifier is a different layer.
///
/// The sublayer list is the document's declared children. It is the one
/// mutable part of the handle; editing it is how "the layer changed" from the
/// registry's point of view, and the registry's reverse indices exist so that
/// affected layer stacks can be found afterwards without a scan.
#[derive(Clone)]
pub struct Layer(Arc<LayerData>);

impl Layer {
    /// Creates a handle for a document with the given identifier and
    /// resolver-produced path.
    pub fn new(identifier: impl Into<String>, resolved_path: impl Into<String>) -> Self {
        Layer(Arc::new(LayerData {
            identifier: identifier.into(),
            resolved_path: resolved_path.into(),
            sublayers: RwLock::new(Vec::new()),
        }))
    }

    /// Creates an in-memory document with a process-unique `anon:` identifier.
    ///
    /// Anonymous layers have an empty resolved path and their identifier is
    /// its own canonical form wherever mute canonicalisation applies.
    pub fn new_anonymous(tag: &str) -> Self {
        let serial = NEXT_ANONYMOUS_SERIAL.fetch_add(1, Ordering::Relaxed);
        let identifier = if tag.is_empty() {
            format!("{ANONYMOUS_IDENTIFIER_PREFIX}{serial:x}")
        } else {
            format!("{ANONYMOUS_IDENTIFIER_PREFIX}{serial:x}:{tag}")
        };
        Self::new(identifier, "")
    }

    pub fn identifier(&self) -> &str {
        &self.0.identifier
    }

    /// The path the resolver assigned to this document; empty for anonymous
    /// layers.
    pub fn resolved_path(&self) -> &str {
        &self.0.resolved_path
    }

    pub fn is_anonymous(&self) -> bool {
        is_anonymous_layer_identifier(&self.0.identifier)
    }

    /// Snapshot of the current sublayer handles, in declaration order.
    pub fn sublayers(&self) -> Vec<Layer> {
        self.0.sublayers.read().unwrap().clone()
    }

    /// Replaces the sublayer list wholesale.
    pub fn set_sublayers(&self, sublayers: Vec<Layer>) {
        *self.0.sublayers.write().unwrap() = sublayers;
    }

    pub fn downgrade(&self) -> WeakLayer {
        WeakLayer(Arc::downgrade(&self.0))
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Layer {}

impl Hash for Layer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.identifier)
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Layer({})", self.0.identifier)
    }
}

/// Non-owning observer of a [`Layer`].
#[derive(Clone)]
pub struct WeakLayer(Weak<LayerData>);

impl WeakLayer {
    /// Upgrades to a strong handle iff the document is still alive.
    pub fn upgrade(&self) -> Option<Layer> {
        self.0.upgrade().map(Layer)
    }
}

impl PartialEq for WeakLayer {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }
}

impl Eq for WeakLayer {}

impl Hash for WeakLayer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_identity_not_content() {
        let a = Layer::new("/proj/scene.usd", "/proj/scene.usd");
        let b = Layer::new("/proj/scene.usd", "/proj/scene.usd");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn anonymous_identifiers_are_unique_and_recognised() {
        let a = Layer::new_anonymous("scratch");
        let b = Layer::new_anonymous("scratch");
        assert!(a.is_anonymous());
        assert!(b.is_anonymous());
        assert_ne!(a.identifier(), b.identifier());
        assert!(is_anonymous_layer_identifier(a.identifier()));
        assert!(!is_anonymous_layer_identifier("/proj/scene.usd"));
        assert_eq!(a.resolved_path(), "");
    }

    #[test]
    fn weak_upgrade_fails_after_drop() {
        let layer = Layer::new("/tmp/a.usd", "/tmp/a.usd");
        let weak = layer.downgrade();
        assert_eq!(weak.upgrade().as_ref(), Some(&layer));
        drop(layer);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn sublayers_can_be_replaced() {
        let root = Layer::new("/tmp/root.usd", "/tmp/root.usd");
        let child = Layer::new("/tmp/child.usd", "/tmp/child.usd");
        assert!(root.sublayers().is_empty());
        root.set_sublayers(vec![child.clone()]);
        assert_eq!(root.sublayers(), vec![child]);
    }
}
