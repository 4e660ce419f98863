//! Monitored repository types.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced when a string or path cannot be turned into a [`RepoKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The owner or name segment was empty.
    #[error("{segment} segment is empty")]
    EmptySegment { segment: &'static str },

    /// A segment contains characters GitHub does not allow in owner/repository names.
    #[error("{segment} segment '{value}' contains invalid characters")]
    InvalidCharacters {
        segment: &'static str,
        value: String,
    },

    /// A path component is not valid UTF-8.
    #[error("path component is not valid UTF-8: {component}")]
    NonUtf8 { component: String },

    /// The input did not have the `owner/name` shape.
    #[error("'{input}' is not of the form owner/name")]
    Malformed { input: String },
}

/// Unique key of a monitored repository, in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey {
    owner: String,
    name: String,
}

impl RepoKey {
    /// Builds a key from its two segments, validating both.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, ParseError> {
        let owner = owner.into();
        let name = name.into();
        validate_segment("owner", &owner)?;
        validate_segment("name", &name)?;
        Ok(Self { owner, name })
    }

    /// Parses an `owner/name` string.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        match input.split_once('/') {
            Some((owner, name)) if !name.contains('/') => Self::new(owner, name),
            _ => Err(ParseError::Malformed {
                input: input.to_string(),
            }),
        }
    }

    /// Derives the key from the last two components of a checkout path
    /// relative to the monitoring root.
    ///
    /// A checkout at `root/acme/widgets` yields `acme/widgets`. Fewer than two
    /// components is reported as [`ParseError::Malformed`] instead of being
    /// truncated.
    pub fn from_relative_path(relative: &Path) -> Result<Self, ParseError> {
        let components: Vec<&std::ffi::OsStr> = relative
            .components()
            .filter_map(|component| match component {
                std::path::Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();

        let [.., owner, name] = components.as_slice() else {
            return Err(ParseError::Malformed {
                input: relative.display().to_string(),
            });
        };

        let owner = owner.to_str().ok_or_else(|| ParseError::NonUtf8 {
            component: owner.to_string_lossy().into_owned(),
        })?;
        let name = name.to_str().ok_or_else(|| ParseError::NonUtf8 {
            component: name.to_string_lossy().into_owned(),
        })?;

        Self::new(owner, name)
    }

    /// Repository owner (user or organization).
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn validate_segment(segment: &'static str, value: &str) -> Result<(), ParseError> {
    if value.is_empty() {
        return Err(ParseError::EmptySegment { segment });
    }

    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value != "."
        && value != "..";

    if !valid {
        return Err(ParseError::InvalidCharacters {
            segment,
            value: value.to_string(),
        });
    }

    Ok(())
}

/// A locally checked-out repository being watched for pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredRepository {
    /// Repository key.
    pub key: RepoKey,

    /// Location of the working copy.
    pub path: PathBuf,

    /// Cache validator from the last successful poll; empty until then.
    pub cache_token: String,

    /// Id of the last event that triggered an update.
    pub last_seen_event: Option<String>,
}

impl MonitoredRepository {
    /// Creates a freshly discovered repository with no polling state.
    pub fn new(key: RepoKey, path: PathBuf) -> Self {
        Self {
            key,
            path,
            cache_token: String::new(),
            last_seen_event: None,
        }
    }

    /// Name of the directory holding the working copy.
    ///
    /// Falls back to the repository name for paths without a final component.
    pub fn directory_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_else(|| self.key.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_name() {
        let key = RepoKey::parse("acme/widgets").unwrap();
        assert_eq!(key.owner(), "acme");
        assert_eq!(key.name(), "widgets");
        assert_eq!(key.to_string(), "acme/widgets");
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(
            RepoKey::parse("widgets"),
            Err(ParseError::Malformed { .. })
        ));
        assert!(matches!(
            RepoKey::parse("a/b/c"),
            Err(ParseError::Malformed { .. })
        ));
        assert!(matches!(
            RepoKey::parse("/widgets"),
            Err(ParseError::EmptySegment { segment: "owner" })
        ));
    }

    #[test]
    fn rejects_invalid_characters() {
        let result = RepoKey::new("acme", "wid gets");
        assert!(matches!(
            result,
            Err(ParseError::InvalidCharacters { segment: "name", .. })
        ));
        assert!(RepoKey::new("..", "widgets").is_err());
    }

    #[test]
    fn derives_key_from_last_two_components() {
        let key = RepoKey::from_relative_path(Path::new("team/acme/widgets")).unwrap();
        assert_eq!(key.to_string(), "acme/widgets");
    }

    #[test]
    fn single_component_path_is_malformed() {
        let result = RepoKey::from_relative_path(Path::new("widgets"));
        assert!(matches!(result, Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn directory_name_comes_from_path() {
        let repo = MonitoredRepository::new(
            RepoKey::parse("acme/widgets").unwrap(),
            PathBuf::from("/srv/acme/widgets-prod"),
        );
        assert_eq!(repo.directory_name(), "widgets-prod");
        assert!(repo.cache_token.is_empty());
        assert!(repo.last_seen_event.is_none());
    }
}
