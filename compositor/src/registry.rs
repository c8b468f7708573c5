//!
//! Identifier-to-layer-stack table and its reverse indices.
//!
//! The registry keeps weak references in every table and promotes to strong
//! on each hand-out. That, together with the destructor notification from
//! [`LayerStack`], is what makes concurrent lookup, creation, and destruction
//! race-free: an entry whose stack has reached a strong count of zero is
//! still observable but no longer upgradeable, so a racing `find_or_create`
//! treats it as a miss and builds a replacement instead of resurrecting it.
//!

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use scene_api::{IdentifierResolver, Layer, LayerStackIdentifier};
use tracing::{error, trace};

use crate::muted::MutedLayers;
use crate::stack::{ComposeError, LayerStack, WeakLayerStack};

/// Everything guarded by the registry lock.
#[derive(Default)]
struct Tables {
    identifier_to_stack: HashMap<LayerStackIdentifier, WeakLayerStack>,
    /// Reverse index layer -> stacks using it. A sequence, not a set: a stack
    /// listing a layer twice contributes two entries, and withdrawal removes
    /// the first occurrence to balance each addition.
    layer_to_stacks: HashMap<Layer, Vec<WeakLayerStack>>,
    /// The layer list each installed stack last published, mirrored so the
    /// reverse index can be withdrawn without consulting the (possibly
    /// already dying) stack.
    stack_to_layers: HashMap<WeakLayerStack, Vec<Layer>>,
    muted_id_to_stacks: HashMap<String, Vec<WeakLayerStack>>,
    stack_to_muted_ids: HashMap<WeakLayerStack, BTreeSet<String>>,
    muted_layers: MutedLayers,
}

/// Concurrent, deduplicating registry of [`LayerStack`]s.
///
/// One reader-writer lock guards all tables. Lock-held regions cover a single
/// lookup or mutation only; layer stack construction and user callbacks run
/// unlocked. The registry is handed around as `Arc<LayerStackRegistry>` so
/// that stacks can keep a weak back-link for their destructor notification.
pub struct LayerStackRegistry {
    tables: RwLock<Tables>,
    root_identifier: LayerStackIdentifier,
    file_format_target: String,
    usd_mode: bool,
    resolver: Arc<dyn IdentifierResolver>,
}

impl LayerStackRegistry {
    pub fn new(
        root_identifier: LayerStackIdentifier,
        file_format_target: impl Into<String>,
        usd_mode: bool,
        resolver: Arc<dyn IdentifierResolver>,
    ) -> Arc<Self> {
        Arc::new(LayerStackRegistry {
            tables: RwLock::new(Tables::default()),
            root_identifier,
            file_format_target: file_format_target.into(),
            usd_mode,
            resolver,
        })
    }

    /// Identifier of the root layer stack this registry was built for.
    pub fn root_identifier(&self) -> &LayerStackIdentifier {
        &self.root_identifier
    }

    pub fn file_format_target(&self) -> &str {
        &self.file_format_target
    }

    pub fn is_usd(&self) -> bool {
        self.usd_mode
    }

    /// Looks up the stack registered for `identifier`.
    ///
    /// The returned weak reference may fail to upgrade if the stack is
    /// between its last strong release and its destructor notification.
    pub fn find(&self, identifier: &LayerStackIdentifier) -> Option<WeakLayerStack> {
        let tables = self.tables.read().unwrap();
        tables.identifier_to_stack.get(identifier).cloned()
    }

    /// Returns the unique live stack for `identifier`, building and
    /// installing one if none exists.
    ///
    /// Local composition errors of a newly installed stack are appended to
    /// `all_errors`; the list is never cleared and stays untouched when an
    /// existing stack is returned. Returns `None` only for an invalid
    /// identifier, which is a coding error reported to the diagnostics sink.
    pub fn find_or_create(
        self: &Arc<Self>,
        identifier: &LayerStackIdentifier,
        all_errors: &mut Vec<ComposeError>,
    ) -> Option<Arc<LayerStack>> {
        if !identifier.is_valid() {
            error!("cannot build a layer stack without a root layer");
            return None;
        }

        {
            let tables = self.tables.read().unwrap();
            if let Some(existing) = tables
                .identifier_to_stack
                .get(identifier)
                .and_then(|weak| weak.upgrade())
            {
                return Some(existing);
            }
            // absent, or present but mid-reclamation: either way a miss
        }

        // Build the replacement without holding the lock. Composition may
        // take arbitrarily long and re-enters the registry for mute lookups.
        let created = LayerStack::new(identifier.clone(), self);

        let adopted = {
            let mut tables = self.tables.write().unwrap();
            match tables
                .identifier_to_stack
                .get(identifier)
                .and_then(|weak| weak.upgrade())
            {
                Some(existing) => {
                    trace!("lost install race for {identifier}, adopting existing stack");
                    Some(existing)
                }
                None => {
                    tables
                        .identifier_to_stack
                        .insert(identifier.clone(), created.weak());
                    created.bind_registry(self);
                    Self::set_layers(
                        &mut tables,
                        &created.weak(),
                        created.layers(),
                        created.muted_layers(),
                    );
                    trace!("installed layer stack {identifier}");
                    None
                }
            }
        };

        match adopted {
            // The transient stack we built is dropped on return, outside the
            // lock; it has no registry back-link so its drop is inert.
            Some(existing) => Some(existing),
            None => {
                all_errors.extend(created.local_errors().iter().cloned());
                Some(created)
            }
        }
    }

    /// True iff `layer_stack` is currently installed in this registry.
    ///
    /// Lock-free: the back-pointer is written only under the write lock, and
    /// the comparison here is by registry address.
    pub fn contains(self: &Arc<Self>, layer_stack: &LayerStack) -> bool {
        layer_stack.is_bound_to(self)
    }

    /// All installed stacks whose resolved layer list contains `layer`.
    /// Empty on miss.
    pub fn find_all_using_layer(&self, layer: &Layer) -> Vec<WeakLayerStack> {
        let tables = self.tables.read().unwrap();
        tables.layer_to_stacks.get(layer).cloned().unwrap_or_default()
    }

    /// All installed stacks whose composition muted `canonical_id`.
    pub fn find_all_using_muted_layer(&self, canonical_id: &str) -> Vec<WeakLayerStack> {
        let tables = self.tables.read().unwrap();
        tables
            .muted_id_to_stacks
            .get(canonical_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every installed stack.
    pub fn all_layer_stacks(&self) -> Vec<WeakLayerStack> {
        let tables = self.tables.read().unwrap();
        tables.identifier_to_stack.values().cloned().collect()
    }

    /// Invokes `f` for every installed stack.
    ///
    /// Iterates over a snapshot taken up front, so `f` runs without the lock
    /// and may call back into the registry, including `find_or_create` and
    /// dropping strong references.
    pub fn for_each_layer_stack(&self, mut f: impl FnMut(&WeakLayerStack)) {
        let stacks = self.all_layer_stacks();
        for stack in &stacks {
            f(stack);
        }
    }

    /// Applies a batch of mute and unmute requests; see
    /// [`LayerStack::muted_layers`] for how the set feeds composition.
    ///
    /// On return the vectors hold the net change in canonical form.
    /// Recomposing affected stacks is the caller's job, typically driven by
    /// [`Self::find_all_using_muted_layer`] over the returned deltas.
    pub fn mute_and_unmute_layers(
        &self,
        anchor: &Layer,
        to_mute: &mut Vec<String>,
        to_unmute: &mut Vec<String>,
    ) {
        let mut tables = self.tables.write().unwrap();
        tables
            .muted_layers
            .mute_and_unmute(self.resolver.as_ref(), anchor, to_mute, to_unmute);
    }

    /// The canonical identifiers currently muted, ascending.
    pub fn muted_layers(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap();
        tables.muted_layers.muted_layers().to_vec()
    }

    /// Returns the canonical identifier iff `layer_id` (anchored at `anchor`)
    /// is muted.
    pub fn is_layer_muted(&self, anchor: &Layer, layer_id: &str) -> Option<String> {
        let tables = self.tables.read().unwrap();
        tables
            .muted_layers
            .is_layer_muted(self.resolver.as_ref(), anchor, layer_id)
    }

    /// Destructor notification from [`LayerStack`].
    ///
    /// Clears every reverse index entry referencing the stack, then removes
    /// the identifier entry iff it still points at this instance. A racing
    /// `find_or_create` may already have installed a replacement for the same
    /// identifier; that replacement is left intact.
    pub(crate) fn set_layers_and_remove(&self, layer_stack: &LayerStack) {
        let mut tables = self.tables.write().unwrap();
        Self::set_layers(&mut tables, &layer_stack.weak(), &[], &BTreeSet::new());
        let entry_is_ours = tables
            .identifier_to_stack
            .get(layer_stack.identifier())
            .is_some_and(|weak| weak.points_to(layer_stack));
        if entry_is_ours {
            tables.identifier_to_stack.remove(layer_stack.identifier());
            trace!("removed layer stack {}", layer_stack.identifier());
        }
    }

    /// Publishes `new_layers` / `new_muted` as the stack's associations,
    /// withdrawing whatever was published before. Runs under the write lock.
    ///
    /// Publishing empty sets is how removal is expressed: every index entry
    /// referencing the stack is withdrawn and no new ones appear.
    fn set_layers(
        tables: &mut Tables,
        stack: &WeakLayerStack,
        new_layers: &[Layer],
        new_muted: &BTreeSet<String>,
    ) {
        if let Some(old_layers) = tables.stack_to_layers.get(stack) {
            for layer in old_layers {
                let now_empty = match tables.layer_to_stacks.get_mut(layer) {
                    Some(stacks) => {
                        if let Some(pos) = stacks.iter().position(|s| s == stack) {
                            stacks.remove(pos);
                        }
                        stacks.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    tables.layer_to_stacks.remove(layer);
                }
            }
        }

        if new_layers.is_empty() {
            tables.stack_to_layers.remove(stack);
        } else {
            tables
                .stack_to_layers
                .insert(stack.clone(), new_layers.to_vec());
        }
        for layer in new_layers {
            tables
                .layer_to_stacks
                .entry(layer.clone())
                .or_default()
                .push(stack.clone());
        }

        if let Some(old_muted) = tables.stack_to_muted_ids.get(stack) {
            for muted_id in old_muted {
                let now_empty = match tables.muted_id_to_stacks.get_mut(muted_id) {
                    Some(stacks) => {
                        if let Some(pos) = stacks.iter().position(|s| s == stack) {
                            stacks.remove(pos);
                        }
                        stacks.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    tables.muted_id_to_stacks.remove(muted_id);
                }
            }
        }

        if new_muted.is_empty() {
            tables.stack_to_muted_ids.remove(stack);
        } else {
            tables
                .stack_to_muted_ids
                .insert(stack.clone(), new_muted.clone());
        }
        for muted_id in new_muted {
            tables
                .muted_id_to_stacks
                .entry(muted_id.clone())
                .or_default()
                .push(stack.clone());
        }
    }
}
