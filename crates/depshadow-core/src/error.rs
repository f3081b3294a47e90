//! Error type shared by every depshadow operation.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for depshadow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while exporting or importing a project graph.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem operation failed.
    #[error("I/O error during {operation} at {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be (de)serialized.
    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Malformed XML in a project, manifest or config file.
    #[error("XML error{}: {message}", path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Xml {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("Invalid version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("Invalid version range '{value}'")]
    InvalidVersionRange { value: String },

    /// Transport failure talking to a package source. A definitive
    /// "not found" is never reported through this variant.
    #[error("Registry error for '{package}' at {source_url}: {message}")]
    Registry {
        source_url: String,
        package: String,
        message: String,
    },

    #[error("Cannot read solution {}: {message}", path.display())]
    Solution { path: PathBuf, message: String },

    #[error("Configuration error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("Failed to start `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}")]
    CommandFailed { command: String, status: i32 },

    /// Two projects (or a project and the shared version file) pin
    /// different ranges for the same package.
    #[error("Conflicting central versions for '{id}': {existing} != {incoming}")]
    CentralVersionConflict {
        id: String,
        existing: String,
        incoming: String,
    },

    #[error("Project name '{name}' appears more than once in the export")]
    DuplicateProjectName { name: String },

    #[error("Package project '{name}' is missing property {property}")]
    InvalidPackageProject { name: String, property: &'static str },

    /// An artifact entry the importer refuses to write back: a name that
    /// is not a bare file name, or a property that is not an XML name.
    #[error("Invalid artifact entry '{value}': {reason}")]
    InvalidArtifact { value: String, reason: &'static str },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }

    /// Wraps any XML reader/writer failure; the writer and reader report
    /// different error types, both of which are `Display`.
    pub fn xml(path: Option<PathBuf>, message: impl std::fmt::Display) -> Self {
        Error::Xml {
            path,
            message: message.to_string(),
        }
    }

    pub fn registry(
        source_url: impl Into<String>,
        package: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Error::Registry {
            source_url: source_url.into(),
            package: package.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_artifact(value: impl Into<String>, reason: &'static str) -> Self {
        Error::InvalidArtifact {
            value: value.into(),
            reason,
        }
    }

    /// True for conflicts the user must fix in the input rather than retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::CentralVersionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_ranges() {
        let err = Error::CentralVersionConflict {
            id: "Newtonsoft.Json".to_string(),
            existing: "1.0.0".to_string(),
            incoming: "2.0.0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Newtonsoft.Json"));
        assert!(msg.contains("1.0.0"));
        assert!(msg.contains("2.0.0"));
        assert!(err.is_conflict());
    }

    #[test]
    fn xml_error_mentions_path_when_known() {
        let err = Error::xml(Some(PathBuf::from("a/b.csproj")), "unexpected end");
        assert!(err.to_string().contains("b.csproj"));
        let err = Error::xml(None, "unexpected end");
        assert_eq!(err.to_string(), "XML error: unexpected end");
    }
}
