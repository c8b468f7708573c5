//!
//! Core of the scene-composition engine: a concurrent, deduplicating registry
//! of layer stacks.
//!
//! A layer stack is an ordered bundle of source documents ("layers") composed
//! from a [`LayerStackIdentifier`]. The registry hands out the unique live
//! stack for an identifier, building it on demand, and maintains reverse
//! indices from layers (and muted layer identifiers) to the stacks that
//! reference them so that a layer change can be propagated without scanning
//! every stack.
//!
//! Lifetime is reference-count driven: the registry stores weak references
//! and promotes them to strong on every hand-out, so dropping the last
//! external strong reference is what removes a stack. See
//! [`LayerStackRegistry`] for the locking discipline.
//!

mod muted;
pub mod registry;
pub mod stack;

pub use registry::LayerStackRegistry;
pub use stack::{ComposeError, LayerStack, WeakLayerStack};

pub use scene_api::{
    is_anonymous_layer_identifier, AnchoredResolver, IdentifierResolver, Layer,
    LayerStackIdentifier, WeakLayer,
};
