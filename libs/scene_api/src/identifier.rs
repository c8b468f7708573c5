use std::fmt;

use crate::layer::Layer;

/// Composite key identifying a layer stack: the root layer of the stack plus
/// an optional session layer overriding it.
///
/// Equality and hashing follow the layer handles' identity semantics. An
/// identifier without a root layer is invalid and cannot be registered;
/// `Default` produces the invalid identifier.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct LayerStackIdentifier {
    root_layer: Option<Layer>,
    session_layer: Option<Layer>,
}

impl LayerStackIdentifier {
    pub fn new(root_layer: Layer) -> Self {
        LayerStackIdentifier {
            root_layer: Some(root_layer),
            session_layer: None,
        }
    }

    pub fn with_session(root_layer: Layer, session_layer: Layer) -> Self {
        LayerStackIdentifier {
            root_layer: Some(root_layer),
            session_layer: Some(session_layer),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.root_layer.is_some()
    }

    pub fn root_layer(&self) -> Option<&Layer> {
        self.root_layer.as_ref()
    }

    pub fn session_layer(&self) -> Option<&Layer> {
        self.session_layer.as_ref()
    }
}

impl fmt::Display for LayerStackIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.root_layer, &self.session_layer) {
            (Some(root), Some(session)) => write!(f, "{root}@{session}"),
            (Some(root), None) => write!(f, "{root}"),
            (None, _) => f.write_str("<invalid>"),
        }
    }
}

impl fmt::Debug for LayerStackIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerStackIdentifier({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_invalid() {
        let id = LayerStackIdentifier::default();
        assert!(!id.is_valid());
        assert!(id.root_layer().is_none());
    }

    #[test]
    fn equality_tracks_layer_identity() {
        let root = Layer::new("/proj/scene.usd", "/proj/scene.usd");
        let session = Layer::new_anonymous("session");

        let a = LayerStackIdentifier::new(root.clone());
        let b = LayerStackIdentifier::new(root.clone());
        assert_eq!(a, b);

        let c = LayerStackIdentifier::with_session(root.clone(), session);
        assert_ne!(a, c);

        let other_root = Layer::new("/proj/scene.usd", "/proj/scene.usd");
        assert_ne!(a, LayerStackIdentifier::new(other_root));
    }
}
