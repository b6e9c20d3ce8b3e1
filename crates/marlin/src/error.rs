use thiserror::Error;

/// Fatal build failures. Anything that is merely suspicious is routed
/// through `diagnostics::Warning` instead and never aborts a phase.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("You must supply at least one entry module")]
    MissingEntries,

    #[error("Could not resolve '{specifier}'{}", importer.as_ref().map(|i| format!(" from {}", i)).unwrap_or_default())]
    UnresolvedImport {
        specifier: String,
        importer: Option<String>,
    },

    #[error("Could not load {id}{}: {reason}", importer.as_ref().map(|i| format!(" (imported by {})", i)).unwrap_or_default())]
    LoadFailure {
        id: String,
        importer: Option<String>,
        reason: String,
    },

    #[error("Parse error in {id} ({line}:{column}): {message}")]
    ParseFailure {
        id: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{0}")]
    StrictDeprecation(String),

    #[error("Unable to find module '{0}' in the graph")]
    UnknownModule(String),

    #[error("Entry module '{0}' cannot be external")]
    ExternalEntry(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Error in plugin '{plugin}': {source}")]
    PluginError {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::CompileError;

    #[test]
    fn test_error_messages() {
        let err = CompileError::UnresolvedImport {
            specifier: "./missing".to_string(),
            importer: Some("/src/main.js".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Could not resolve './missing' from /src/main.js"
        );

        let err = CompileError::ParseFailure {
            id: "/src/a.js".to_string(),
            line: 3,
            column: 7,
            message: "unexpected token".to_string(),
        };
        assert!(err.to_string().contains("(3:7)"));
    }
}
