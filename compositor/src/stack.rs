use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapWeak;
use scene_api::{Layer, LayerStackIdentifier};
use thiserror::Error;

use crate::registry::LayerStackRegistry;

/// Errors produced while composing a single layer stack.
///
/// These are local to the stack that produced them and are appended to the
/// caller's error list when the stack is first installed in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("sublayer {sublayer} of {layer} closes a cycle and was skipped")]
    SublayerCycle { layer: String, sublayer: String },

    #[error("sublayer of {layer} has an empty identifier and was skipped")]
    InvalidSublayer { layer: String },
}

/// An ordered composition of layers built from a [`LayerStackIdentifier`].
///
/// Construction resolves the identifier's session and root layers and expands
/// their sublayers depth-first, skipping muted ones. The registry holds a
/// weak reference and hands out `Arc<LayerStack>`; when the last strong
/// reference is dropped the stack notifies its owning registry, which clears
/// the reverse indices and the identifier entry.
pub struct LayerStack {
    identifier: LayerStackIdentifier,
    layers: Vec<Layer>,
    muted_layers: BTreeSet<String>,
    local_errors: Vec<ComposeError>,
    /// Back-link to the owning registry; set once under the registry's write
    /// lock during installation. Never a strong reference: the registry
    /// already owns this stack transitively and a strong link would cycle.
    registry: ArcSwapWeak<LayerStackRegistry>,
    myself: Weak<LayerStack>,
}

impl LayerStack {
    /// Builds the stack for `identifier`. Runs without the registry lock;
    /// mute lookups re-enter the registry as ordinary readers.
    pub(crate) fn new(
        identifier: LayerStackIdentifier,
        registry: &Arc<LayerStackRegistry>,
    ) -> Arc<Self> {
        let mut composition = Composition {
            registry,
            layers: Vec::new(),
            muted_layers: BTreeSet::new(),
            errors: Vec::new(),
            branch: Vec::new(),
        };
        if let Some(session) = identifier.session_layer() {
            composition.add_branch(session);
        }
        if let Some(root) = identifier.root_layer() {
            composition.add_branch(root);
        }

        Arc::new_cyclic(|myself| LayerStack {
            identifier,
            layers: composition.layers,
            muted_layers: composition.muted_layers,
            local_errors: composition.errors,
            registry: ArcSwapWeak::new(Weak::new()),
            myself: myself.clone(),
        })
    }

    pub fn identifier(&self) -> &LayerStackIdentifier {
        &self.identifier
    }

    /// The resolved layer order: session branch first, then the root branch,
    /// each in depth-first sublayer order. A layer reachable more than once
    /// appears more than once.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Canonical identifiers of layers that were muted away during
    /// composition of this stack.
    pub fn muted_layers(&self) -> &BTreeSet<String> {
        &self.muted_layers
    }

    pub fn local_errors(&self) -> &[ComposeError] {
        &self.local_errors
    }

    pub(crate) fn weak(&self) -> WeakLayerStack {
        WeakLayerStack(self.myself.clone())
    }

    pub(crate) fn bind_registry(&self, registry: &Arc<LayerStackRegistry>) {
        self.registry.store(Arc::downgrade(registry));
    }

    pub(crate) fn is_bound_to(&self, registry: &Arc<LayerStackRegistry>) -> bool {
        std::ptr::eq(self.registry.load_full().as_ptr(), Arc::as_ptr(registry))
    }
}

impl Drop for LayerStack {
    fn drop(&mut self) {
        // Only an installed stack has a registry back-link. The loser of a
        // find-or-create race never got one, so its drop must not (and does
        // not) touch any table.
        if let Some(registry) = self.registry.load_full().upgrade() {
            registry.set_layers_and_remove(self);
        }
        self.registry.store(Weak::new());
    }
}

impl fmt::Display for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerStack({})", self.identifier)
    }
}

/// Non-owning observer of a [`LayerStack`], as stored in the registry tables.
///
/// Upgrade succeeds iff the stack's strong count is still positive; a stack
/// between its last strong release and its destructor notification is
/// observable but not upgradeable, which is what keeps the find-or-create
/// protocol from resurrecting it.
#[derive(Clone)]
pub struct WeakLayerStack(pub(crate) Weak<LayerStack>);

impl WeakLayerStack {
    pub fn upgrade(&self) -> Option<Arc<LayerStack>> {
        self.0.upgrade()
    }

    pub(crate) fn points_to(&self, stack: &LayerStack) -> bool {
        std::ptr::eq(self.0.as_ptr(), stack as *const LayerStack)
    }
}

impl PartialEq for WeakLayerStack {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }
}

impl Eq for WeakLayerStack {}

impl Hash for WeakLayerStack {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
    }
}

impl fmt::Debug for WeakLayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakLayerStack({:p})", self.0.as_ptr())
    }
}

struct Composition<'a> {
    registry: &'a Arc<LayerStackRegistry>,
    layers: Vec<Layer>,
    muted_layers: BTreeSet<String>,
    errors: Vec<ComposeError>,
    /// Ancestor chain of the current depth-first descent, for cycle
    /// detection.
    branch: Vec<Layer>,
}

impl Composition<'_> {
    fn add_branch(&mut self, layer: &Layer) {
        self.layers.push(layer.clone());
        self.branch.push(layer.clone());

        for sublayer in layer.sublayers() {
            if sublayer.identifier().is_empty() {
                self.errors.push(ComposeError::InvalidSublayer {
                    layer: layer.identifier().to_owned(),
                });
                continue;
            }
            if self.branch.contains(&sublayer) {
                self.errors.push(ComposeError::SublayerCycle {
                    layer: layer.identifier().to_owned(),
                    sublayer: sublayer.identifier().to_owned(),
                });
                continue;
            }
            // anchor is the parent layer: mute identifiers are canonicalised
            // against the document that names the sublayer
            if let Some(canonical) = self
                .registry
                .is_layer_muted(layer, sublayer.identifier())
            {
                self.muted_layers.insert(canonical);
                continue;
            }
            self.add_branch(&sublayer);
        }

        self.branch.pop();
    }
}
