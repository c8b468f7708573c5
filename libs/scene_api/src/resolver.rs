use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::layer::is_anonymous_layer_identifier;

/// Composes raw asset paths into canonical identifiers.
///
/// Implementations must be pure: the same `(asset_path, anchor_resolved_path)`
/// pair always yields the same identifier. The mute machinery stores the
/// output verbatim as a comparison key, so any instability here would corrupt
/// its ordering.
pub trait IdentifierResolver: Send + Sync {
    fn create_identifier(&self, asset_path: &str, anchor_resolved_path: &str) -> String;
}

/// Anchor-relative resolver.
///
/// Anonymous identifiers and absolute paths pass through unchanged (modulo
/// lexical normalisation); relative paths are joined against the parent
/// directory of the anchor's resolved path. Resolution is purely lexical and
/// never consults the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnchoredResolver;

impl IdentifierResolver for AnchoredResolver {
    fn create_identifier(&self, asset_path: &str, anchor_resolved_path: &str) -> String {
        if asset_path.is_empty() || is_anonymous_layer_identifier(asset_path) {
            return asset_path.to_owned();
        }

        let path = Utf8Path::new(asset_path);
        if path.is_absolute() || anchor_resolved_path.is_empty() {
            return normalized(path);
        }

        let anchor_dir = Utf8Path::new(anchor_resolved_path)
            .parent()
            .unwrap_or_else(|| Utf8Path::new(""));
        normalized(&anchor_dir.join(path))
    }
}

/// Lexically folds `.` and `..` components without touching the filesystem.
fn normalized(path: &Utf8Path) -> String {
    let mut parts: Vec<Utf8Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match parts.last() {
                Some(Utf8Component::Normal(_)) => {
                    parts.pop();
                }
                // cannot go above the root; leading ".." on a relative path
                // is kept as-is
                Some(Utf8Component::RootDir) | Some(Utf8Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    let mut out = Utf8PathBuf::new();
    for part in parts {
        out.push(part.as_str());
    }
    out.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(asset_path: &str, anchor: &str) -> String {
        AnchoredResolver.create_identifier(asset_path, anchor)
    }

    #[test]
    fn relative_paths_anchor_to_parent_directory() {
        assert_eq!(resolve("./over.usd", "/proj/scene.usd"), "/proj/over.usd");
        assert_eq!(resolve("over.usd", "/proj/scene.usd"), "/proj/over.usd");
        assert_eq!(
            resolve("shots/sh01.usd", "/proj/scene.usd"),
            "/proj/shots/sh01.usd"
        );
    }

    #[test]
    fn parent_components_fold_lexically() {
        assert_eq!(
            resolve("../shared/base.usd", "/proj/shots/sh01.usd"),
            "/proj/shared/base.usd"
        );
        assert_eq!(resolve("/a/b/../c/./d.usd", ""), "/a/c/d.usd");
        // cannot escape the root
        assert_eq!(resolve("../../x.usd", "/top.usd"), "/x.usd");
    }

    #[test]
    fn absolute_and_anonymous_pass_through() {
        assert_eq!(resolve("/abs/layer.usd", "/proj/scene.usd"), "/abs/layer.usd");
        assert_eq!(resolve("anon:1:scratch", "/proj/scene.usd"), "anon:1:scratch");
        assert_eq!(resolve("", "/proj/scene.usd"), "");
    }

    #[test]
    fn empty_anchor_keeps_relative_paths() {
        assert_eq!(resolve("over.usd", ""), "over.usd");
        assert_eq!(resolve("./a/../over.usd", ""), "over.usd");
    }
}
