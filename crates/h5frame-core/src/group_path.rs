//! Group paths and their resolution against an open file.

use std::fmt;

use log::debug;

use crate::error::{GroupNotFoundSnafu, HdfResult, LeafAlreadyExistsSnafu, StorageSnafu};
use crate::storage::{GroupId, H5File, StorageError};
use snafu::prelude::*;

/// A normalized location in the group tree; no segments means the root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupPath {
    segments: Vec<String>,
}

impl GroupPath {
    /// Split `raw` on `/`.
    ///
    /// A leading and a trailing empty segment are dropped while more than one
    /// segment remains, so `"/a/b/"`, `"a/b"`, `"/a/b"` and `"a/b/"` all
    /// normalize to `["a", "b"]`, and `""` or `"/"` is the root. Empty
    /// segments in the middle (`"a//b"`) are kept and fail name validation
    /// on creation.
    pub fn parse(raw: &str) -> Self {
        let mut segments: Vec<&str> = raw.split('/').collect();
        if segments.len() > 1 && segments.first() == Some(&"") {
            segments.remove(0);
        }
        if segments.len() > 1 && segments.last() == Some(&"") {
            segments.pop();
        }
        if segments == [""] {
            segments.clear();
        }
        GroupPath {
            segments: segments.into_iter().map(str::to_string).collect(),
        }
    }

    /// The normalized segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True for the root group.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Resolve `path` to a group of `file`, walking from the root.
///
/// `None` and `""` resolve to the root without touching the file. With
/// `create_if_missing` every absent segment is created in order, so repeated
/// calls with the same path return the same group and create nothing new;
/// without it an absent segment fails with
/// [`HdfError::GroupNotFound`](crate::HdfError::GroupNotFound).
pub fn resolve(
    file: &mut H5File,
    path: Option<&str>,
    create_if_missing: bool,
) -> HdfResult<GroupId> {
    let root = file.root();
    let Some(raw) = path.filter(|p| !p.is_empty()) else {
        return Ok(root);
    };
    let parsed = GroupPath::parse(raw);

    let mut current = root;
    for segment in parsed.segments() {
        current = match file.child_group(current, segment) {
            Ok(Some(child)) => child,
            Ok(None) if create_if_missing => {
                debug!("Creating missing group segment {segment:?} of {parsed}");
                file.create_group(current, segment).context(StorageSnafu)?
            }
            Ok(None) => {
                return GroupNotFoundSnafu {
                    path: parsed.to_string(),
                    segment: segment.clone(),
                }
                .fail();
            }
            // A leaf occupies the segment's name.
            Err(StorageError::NotAGroup { .. }) if create_if_missing => {
                return LeafAlreadyExistsSnafu {
                    group: file.group_path(current)?,
                    leaf: segment.clone(),
                }
                .fail();
            }
            Err(StorageError::NotAGroup { .. }) => {
                return GroupNotFoundSnafu {
                    path: parsed.to_string(),
                    segment: segment.clone(),
                }
                .fail();
            }
            Err(source) => return Err(source.into()),
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::error::HdfError;
    use crate::storage::StorageOptions;

    #[test]
    fn separators_are_insignificant() {
        let expected = ["a".to_string(), "b".to_string()];
        for raw in ["/a/b/", "a/b", "/a/b", "a/b/"] {
            assert_eq!(GroupPath::parse(raw).segments(), expected, "{raw}");
        }
    }

    #[test]
    fn root_forms() {
        assert!(GroupPath::parse("").is_root());
        assert!(GroupPath::parse("/").is_root());
        assert_eq!(GroupPath::parse("x").segments(), ["x".to_string()]);
        assert_eq!(GroupPath::parse("/country/ar").to_string(), "/country/ar");
    }

    #[test]
    fn resolve_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = TempDir::new()?;
        let mut file =
            H5File::create_truncate(tmp.path().join("g.h5"), &StorageOptions::default())?;

        let first = resolve(&mut file, Some("/country/ar/"), true)?;
        let second = resolve(&mut file, Some("country/ar"), true)?;
        assert_eq!(first, second);

        let third = resolve(&mut file, Some("/country/ar"), true)?;
        assert_eq!(first, third);

        // Each intermediate group exists exactly once.
        let root = file.root();
        let country = file.child_group(root, "country")?.unwrap();
        assert_eq!(file.groups(root)?, vec![country]);
        assert_eq!(file.groups(country)?, vec![first]);
        assert!(file.groups(first)?.is_empty());
        assert_eq!(file.leaves(country)?.len(), 0);
        assert_eq!(file.group_path(first)?, "/country/ar");
        Ok(())
    }

    #[test]
    fn empty_path_is_root() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = TempDir::new()?;
        let mut file =
            H5File::create_truncate(tmp.path().join("r.h5"), &StorageOptions::default())?;
        let root = file.root();
        assert_eq!(resolve(&mut file, None, true)?, root);
        assert_eq!(resolve(&mut file, Some(""), true)?, root);
        assert_eq!(resolve(&mut file, Some("/"), false)?, root);
        Ok(())
    }

    #[test]
    fn missing_segment_without_creation_fails() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = TempDir::new()?;
        let mut file =
            H5File::create_truncate(tmp.path().join("m.h5"), &StorageOptions::default())?;
        resolve(&mut file, Some("country"), true)?;

        let err = resolve(&mut file, Some("/country/us"), false).unwrap_err();
        assert!(
            matches!(err, HdfError::GroupNotFound { ref segment, .. } if segment == "us"),
            "{err}"
        );
        Ok(())
    }
}
