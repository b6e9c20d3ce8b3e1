use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WarningCode {
    CircularDependency,
    MissingExport,
    NonExistentExport,
    UnusedExternalImport,
    DeprecatedFeature,
    ConflictingManualChunk,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            WarningCode::MissingExport => "MISSING_EXPORT",
            WarningCode::NonExistentExport => "NON_EXISTENT_EXPORT",
            WarningCode::UnusedExternalImport => "UNUSED_EXTERNAL_IMPORT",
            WarningCode::DeprecatedFeature => "DEPRECATED_FEATURE",
            WarningCode::ConflictingManualChunk => "CONFLICTING_MANUAL_CHUNK",
        }
    }
}

/// Source position attached to a warning, 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarnLoc {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
    pub plugin: Option<String>,
    pub id: Option<String>,
    pub loc: Option<WarnLoc>,
    /// Cycle path for `CIRCULAR_DEPENDENCY`, e.g. `[a, b, a]`.
    pub cycle: Option<Vec<String>>,
}

impl Warning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            plugin: None,
            id: None,
            loc: None,
            cycle: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_loc(mut self, line: usize, column: usize) -> Self {
        self.loc = Some(WarnLoc { line, column });
        self
    }

    pub fn with_cycle(mut self, cycle: Vec<String>) -> Self {
        self.cycle = Some(cycle);
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.code.as_str())?;
        if let Some(plugin) = &self.plugin {
            write!(f, " [plugin {}]", plugin)?;
        }
        if let Some(id) = &self.id {
            write!(f, " {}", id)?;
            if let Some(loc) = &self.loc {
                write!(f, " ({}:{})", loc.line, loc.column)?;
            }
        }
        write!(f, " {}", self.message)
    }
}

pub type WarningHandler = Arc<dyn Fn(&Warning) + Send + Sync>;

/// Routes warnings to the configured handler, in emission order.
/// Phases never mutate this; it is shared read-only across the build.
pub struct Diagnostics {
    handler: WarningHandler,
    strict_deprecations: bool,
}

impl Diagnostics {
    pub fn new(handler: Option<WarningHandler>, strict_deprecations: bool) -> Self {
        Self {
            handler: handler
                .unwrap_or_else(|| Arc::new(|w: &Warning| tracing::warn!("{}", w))),
            strict_deprecations,
        }
    }

    pub fn warn(&self, warning: Warning) {
        (self.handler)(&warning);
    }

    /// Under strict deprecations a deprecated usage is a build failure.
    pub fn warn_deprecation(&self, message: impl Into<String>) -> Result<(), CompileError> {
        let message = message.into();
        if self.strict_deprecations {
            return Err(CompileError::StrictDeprecation(message));
        }
        self.warn(Warning::new(WarningCode::DeprecatedFeature, message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collecting() -> (Diagnostics, Arc<Mutex<Vec<Warning>>>) {
        let sink: Arc<Mutex<Vec<Warning>>> = Default::default();
        let sink_clone = sink.clone();
        let diagnostics = Diagnostics::new(
            Some(Arc::new(move |w: &Warning| {
                sink_clone.lock().unwrap().push(w.clone())
            })),
            false,
        );
        (diagnostics, sink)
    }

    #[test]
    fn test_warn_routes_to_handler() {
        let (diagnostics, sink) = collecting();
        diagnostics.warn(
            Warning::new(WarningCode::MissingExport, "'x' is not exported")
                .with_id("/a.js")
                .with_loc(1, 9),
        );
        let seen = sink.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code.as_str(), "MISSING_EXPORT");
        assert_eq!(
            seen[0].to_string(),
            "(MISSING_EXPORT) /a.js (1:9) 'x' is not exported"
        );
    }

    #[test]
    fn test_strict_deprecations_are_fatal() {
        let diagnostics = Diagnostics::new(Some(Arc::new(|_| {})), true);
        assert!(diagnostics.warn_deprecation("gone soon").is_err());

        let (diagnostics, sink) = collecting();
        diagnostics.warn_deprecation("gone soon").unwrap();
        assert_eq!(sink.lock().unwrap()[0].code, WarningCode::DeprecatedFeature);
    }
}
