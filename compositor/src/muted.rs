use scene_api::{is_anonymous_layer_identifier, IdentifierResolver, Layer};

/// Registry-wide set of muted layer identifiers, stored in canonical form.
///
/// The backing vector is kept sorted ascending and duplicate-free so that
/// membership tests are a binary search. Canonicalisation happens against the
/// anchor's resolved path *at the time of the call*; if the anchor's
/// resolution later changes, stored identifiers are not re-canonicalised.
#[derive(Default)]
pub(crate) struct MutedLayers {
    layers: Vec<String>,
}

fn canonical_mute_id(
    resolver: &dyn IdentifierResolver,
    anchor: &Layer,
    layer_id: &str,
) -> String {
    if is_anonymous_layer_identifier(layer_id) {
        return layer_id.to_owned();
    }
    resolver.create_identifier(layer_id, anchor.resolved_path())
}

impl MutedLayers {
    pub(crate) fn muted_layers(&self) -> &[String] {
        &self.layers
    }

    /// Applies a batch of mute and unmute requests.
    ///
    /// On return `to_mute` and `to_unmute` hold the net change in canonical
    /// form: identifiers that were already muted (or already unmuted) are
    /// filtered out, so the caller learns exactly which stacks need
    /// recomposition.
    pub(crate) fn mute_and_unmute(
        &mut self,
        resolver: &dyn IdentifierResolver,
        anchor: &Layer,
        to_mute: &mut Vec<String>,
        to_unmute: &mut Vec<String>,
    ) {
        let mut muted = Vec::new();
        let mut unmuted = Vec::new();

        for layer_id in to_mute.iter() {
            let canonical = canonical_mute_id(resolver, anchor, layer_id);
            if let Err(pos) = self.layers.binary_search(&canonical) {
                self.layers.insert(pos, canonical.clone());
                muted.push(canonical);
            }
        }

        for layer_id in to_unmute.iter() {
            let canonical = canonical_mute_id(resolver, anchor, layer_id);
            if let Ok(pos) = self.layers.binary_search(&canonical) {
                self.layers.remove(pos);
                unmuted.push(canonical);
            }
        }

        *to_mute = muted;
        *to_unmute = unmuted;
    }

    /// Returns the canonical identifier iff the layer is muted.
    pub(crate) fn is_layer_muted(
        &self,
        resolver: &dyn IdentifierResolver,
        anchor: &Layer,
        layer_id: &str,
    ) -> Option<String> {
        if self.layers.is_empty() {
            return None;
        }
        let canonical = canonical_mute_id(resolver, anchor, layer_id);
        match self.layers.binary_search(&canonical) {
            Ok(_) => Some(canonical),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scene_api::AnchoredResolver;

    fn anchor() -> Layer {
        Layer::new("/proj/scene.usd", "/proj/scene.usd")
    }

    fn mute(muted: &mut MutedLayers, anchor: &Layer, ids: &[&str]) -> Vec<String> {
        let mut to_mute: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        let mut to_unmute = Vec::new();
        muted.mute_and_unmute(&AnchoredResolver, anchor, &mut to_mute, &mut to_unmute);
        to_mute
    }

    fn unmute(muted: &mut MutedLayers, anchor: &Layer, ids: &[&str]) -> Vec<String> {
        let mut to_mute = Vec::new();
        let mut to_unmute: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        muted.mute_and_unmute(&AnchoredResolver, anchor, &mut to_mute, &mut to_unmute);
        to_unmute
    }

    #[test]
    fn canonicalises_and_filters_redundant_requests() {
        let mut muted = MutedLayers::default();
        let anchor = anchor();

        let delta = mute(&mut muted, &anchor, &["./over.usd", "./over.usd", "anon:7:x"]);
        assert_eq!(delta, vec!["/proj/over.usd".to_string(), "anon:7:x".to_string()]);
        assert_eq!(muted.muted_layers(), ["/proj/over.usd", "anon:7:x"]);

        // second application is a no-op with an empty delta
        let delta = mute(&mut muted, &anchor, &["./over.usd", "anon:7:x"]);
        assert!(delta.is_empty());
        assert_eq!(muted.muted_layers(), ["/proj/over.usd", "anon:7:x"]);
    }

    #[test]
    fn layers_stay_sorted_and_unique() {
        let mut muted = MutedLayers::default();
        let anchor = anchor();

        mute(&mut muted, &anchor, &["zebra.usd", "alpha.usd", "middle.usd"]);
        let layers = muted.muted_layers().to_vec();
        let mut sorted = layers.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(layers, sorted);
    }

    #[test]
    fn mute_then_unmute_round_trips() {
        let mut muted = MutedLayers::default();
        let anchor = anchor();

        mute(&mut muted, &anchor, &["./over.usd"]);
        assert!(muted
            .is_layer_muted(&AnchoredResolver, &anchor, "over.usd")
            .is_some());

        let delta = unmute(&mut muted, &anchor, &["over.usd"]);
        assert_eq!(delta, vec!["/proj/over.usd".to_string()]);
        assert!(muted
            .is_layer_muted(&AnchoredResolver, &anchor, "over.usd")
            .is_none());
        assert!(muted.muted_layers().is_empty());
    }

    #[test]
    fn unmuting_an_unknown_layer_is_a_no_op() {
        let mut muted = MutedLayers::default();
        let anchor = anchor();

        let delta = unmute(&mut muted, &anchor, &["never-muted.usd"]);
        assert!(delta.is_empty());
        assert!(muted.muted_layers().is_empty());
    }

    #[test]
    fn is_layer_muted_reports_the_canonical_form() {
        let mut muted = MutedLayers::default();
        let anchor = anchor();

        mute(&mut muted, &anchor, &["./sub/../over.usd"]);
        let canonical = muted
            .is_layer_muted(&AnchoredResolver, &anchor, "./over.usd")
            .expect("muted");
        assert_eq!(canonical, "/proj/over.usd");
    }
}
