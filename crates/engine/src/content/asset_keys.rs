use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetKeyError {
    #[error("asset key must not be empty")]
    Empty,
    #[error("asset key must be relative to the asset root")]
    Absolute,
    #[error("asset key must use '/' separators, found '\\\\'")]
    Backslash,
    #[error("asset key segment {index} is empty")]
    EmptySegment { index: usize },
    #[error("asset key segment {segment:?} escapes or aliases a directory")]
    DotSegment { segment: String },
    #[error("asset key contains control character {character:?}")]
    ControlCharacter { character: char },
}

/// Maps an image id onto a file under `root`, one `/`-separated segment at a
/// time. Ids never leave the root.
pub(crate) fn resolve_asset_path(root: &Path, key: &str) -> Result<PathBuf, AssetKeyError> {
    if key.is_empty() {
        return Err(AssetKeyError::Empty);
    }
    if key.starts_with('/') {
        return Err(AssetKeyError::Absolute);
    }
    if key.contains('\\') {
        return Err(AssetKeyError::Backslash);
    }
    if let Some(character) = key.chars().find(|ch| ch.is_control()) {
        return Err(AssetKeyError::ControlCharacter { character });
    }

    let mut path = root.to_path_buf();
    for (index, segment) in key.split('/').enumerate() {
        match segment {
            "" => return Err(AssetKeyError::EmptySegment { index }),
            "." | ".." => {
                return Err(AssetKeyError::DotSegment {
                    segment: segment.to_string(),
                })
            }
            _ => path.push(segment),
        }
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_ids_resolve_under_root() {
        let path = resolve_asset_path(Path::new("art"), "tiles/grass 1.png").expect("path");
        assert_eq!(path, Path::new("art").join("tiles").join("grass 1.png"));
    }

    #[test]
    fn dotted_file_names_are_not_traversal() {
        assert!(resolve_asset_path(Path::new("art"), "hero..v2.png").is_ok());
    }

    #[test]
    fn rejects_ids_that_leave_or_alias_root() {
        let root = Path::new("art");
        assert_eq!(resolve_asset_path(root, ""), Err(AssetKeyError::Empty));
        assert_eq!(resolve_asset_path(root, "/etc/x.png"), Err(AssetKeyError::Absolute));
        assert_eq!(resolve_asset_path(root, r"a\b.png"), Err(AssetKeyError::Backslash));
        assert_eq!(
            resolve_asset_path(root, "a//b.png"),
            Err(AssetKeyError::EmptySegment { index: 1 })
        );
        assert!(matches!(
            resolve_asset_path(root, "a/../b.png"),
            Err(AssetKeyError::DotSegment { segment }) if segment == ".."
        ));
        assert!(matches!(
            resolve_asset_path(root, "a\tb.png"),
            Err(AssetKeyError::ControlCharacter { character: '\t' })
        ));
    }
}
