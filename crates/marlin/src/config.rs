use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::error::CompileError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parse config failed: {0}")]
    InvalidConfig(String),
}

/// The entry option: a single id, an ordered list, or a name -> id map.
/// The map form establishes named entries; the other forms derive names
/// from the id's file stem.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum InputConfig {
    Single(String),
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

impl InputConfig {
    /// Flatten into `(name, id)` pairs in declaration order.
    pub fn entries(&self) -> Vec<(String, String)> {
        match self {
            InputConfig::Single(id) => vec![(derive_entry_name(id), id.clone())],
            InputConfig::List(ids) => ids
                .iter()
                .map(|id| (derive_entry_name(id), id.clone()))
                .collect(),
            InputConfig::Map(map) => map
                .iter()
                .map(|(name, id)| (name.clone(), id.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            InputConfig::Single(id) => id.is_empty(),
            InputConfig::List(ids) => ids.is_empty(),
            InputConfig::Map(map) => map.is_empty(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig::List(vec![])
    }
}

fn derive_entry_name(id: &str) -> String {
    let base = id.rsplit(['/', '\\']).next().unwrap_or(id);
    base.split('.').next().unwrap_or(base).to_string()
}

pub type ExternalPredicate = Arc<dyn Fn(&str, Option<&str>, bool) -> bool + Send + Sync>;

/// `external` option. String entries wrapped in slashes (`/^node:/`)
/// are compiled to regexes; everything else matches the id exactly.
/// The predicate form is a runtime value, not serialized config.
#[derive(Clone, Default)]
pub struct ExternalConfig {
    pub patterns: Vec<String>,
    pub predicate: Option<ExternalPredicate>,
}

impl fmt::Debug for ExternalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalConfig")
            .field("patterns", &self.patterns)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl<'de> Deserialize<'de> for ExternalConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let patterns = Vec::<String>::deserialize(deserializer)?;
        Ok(ExternalConfig {
            patterns,
            predicate: None,
        })
    }
}

/// Pattern set compiled once at compiler construction.
pub struct CompiledExternals {
    exact: Vec<String>,
    regexes: Vec<Regex>,
    predicate: Option<ExternalPredicate>,
}

impl CompiledExternals {
    pub fn compile(config: &ExternalConfig) -> Result<Self, CompileError> {
        let mut exact = vec![];
        let mut regexes = vec![];
        for pattern in &config.patterns {
            if pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/') {
                let source = &pattern[1..pattern.len() - 1];
                let regex = Regex::new(source).map_err(|e| CompileError::InvalidOption {
                    option: "external".to_string(),
                    reason: format!("invalid pattern {}: {}", pattern, e),
                })?;
                regexes.push(regex);
            } else {
                exact.push(pattern.clone());
            }
        }
        Ok(Self {
            exact,
            regexes,
            predicate: config.predicate.clone(),
        })
    }

    pub fn is_external(&self, specifier: &str, importer: Option<&str>, is_resolved: bool) -> bool {
        if self.exact.iter().any(|e| e == specifier) {
            return true;
        }
        if self.regexes.iter().any(|r| r.is_match(specifier)) {
            return true;
        }
        if let Some(predicate) = &self.predicate {
            return predicate(specifier, importer, is_resolved);
        }
        false
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreserveEntrySignatures {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "strict")]
    #[default]
    Strict,
    #[serde(rename = "allow-extension")]
    AllowExtension,
}

pub type SideEffectsPredicate = Arc<dyn Fn(&str, bool) -> bool + Send + Sync>;

/// `treeshake.moduleSideEffects`: default liveness of a module's
/// top-level statements.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ModuleSideEffects {
    Flag(bool),
    Keyword(String),
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeshakeOptions {
    pub annotations: Option<bool>,
    pub module_side_effects: Option<ModuleSideEffects>,
    pub property_read_side_effects: Option<bool>,
    /// Deprecated alias for `moduleSideEffects: "no-external"`.
    pub pure_external_modules: Option<bool>,
    pub try_catch_deoptimization: Option<bool>,
    pub unknown_global_side_effects: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum TreeshakeConfig {
    Flag(bool),
    Options(TreeshakeOptions),
}

impl Default for TreeshakeConfig {
    fn default() -> Self {
        TreeshakeConfig::Flag(true)
    }
}

/// Per-module side-effect policy after option normalization.
#[derive(Clone, Default)]
pub enum SideEffectsPolicy {
    #[default]
    Always,
    Never,
    NoExternal,
    Predicate(SideEffectsPredicate),
}

impl fmt::Debug for SideEffectsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideEffectsPolicy::Always => write!(f, "Always"),
            SideEffectsPolicy::Never => write!(f, "Never"),
            SideEffectsPolicy::NoExternal => write!(f, "NoExternal"),
            SideEffectsPolicy::Predicate(_) => write!(f, "Predicate"),
        }
    }
}

impl SideEffectsPolicy {
    pub fn for_module(&self, id: &str, is_external: bool) -> bool {
        match self {
            SideEffectsPolicy::Always => true,
            SideEffectsPolicy::Never => false,
            SideEffectsPolicy::NoExternal => !is_external,
            SideEffectsPolicy::Predicate(p) => p(id, is_external),
        }
    }
}

/// Fully resolved tree-shaking behaviour, one instance per build.
#[derive(Debug, Clone)]
pub struct Treeshake {
    pub enabled: bool,
    pub annotations: bool,
    pub module_side_effects: SideEffectsPolicy,
    pub property_read_side_effects: bool,
    pub try_catch_deoptimization: bool,
    pub unknown_global_side_effects: bool,
}

impl Default for Treeshake {
    fn default() -> Self {
        Self {
            enabled: true,
            annotations: true,
            module_side_effects: SideEffectsPolicy::Always,
            property_read_side_effects: true,
            try_catch_deoptimization: true,
            unknown_global_side_effects: true,
        }
    }
}

impl TreeshakeConfig {
    pub fn normalize(
        &self,
        side_effects_predicate: Option<SideEffectsPredicate>,
        diagnostics: &Diagnostics,
    ) -> Result<Treeshake, CompileError> {
        let mut resolved = Treeshake::default();
        match self {
            TreeshakeConfig::Flag(enabled) => {
                resolved.enabled = *enabled;
            }
            TreeshakeConfig::Options(options) => {
                resolved.annotations = options.annotations.unwrap_or(true);
                resolved.property_read_side_effects =
                    options.property_read_side_effects.unwrap_or(true);
                resolved.try_catch_deoptimization =
                    options.try_catch_deoptimization.unwrap_or(true);
                resolved.unknown_global_side_effects =
                    options.unknown_global_side_effects.unwrap_or(true);
                resolved.module_side_effects = match (&options.module_side_effects, side_effects_predicate) {
                    (_, Some(predicate)) => SideEffectsPolicy::Predicate(predicate),
                    (Some(ModuleSideEffects::Flag(true)) | None, _) => SideEffectsPolicy::Always,
                    (Some(ModuleSideEffects::Flag(false)), _) => SideEffectsPolicy::Never,
                    (Some(ModuleSideEffects::Keyword(kw)), _) if kw == "no-external" => {
                        SideEffectsPolicy::NoExternal
                    }
                    (Some(ModuleSideEffects::Keyword(kw)), _) => {
                        return Err(CompileError::InvalidOption {
                            option: "treeshake.moduleSideEffects".to_string(),
                            reason: format!("unknown keyword '{}'", kw),
                        })
                    }
                };
                if options.pure_external_modules == Some(true) {
                    diagnostics.warn_deprecation(
                        "treeshake.pureExternalModules is deprecated, use treeshake.moduleSideEffects: \"no-external\" instead",
                    )?;
                    if matches!(resolved.module_side_effects, SideEffectsPolicy::Always) {
                        resolved.module_side_effects = SideEffectsPolicy::NoExternal;
                    }
                }
            }
        }
        Ok(resolved)
    }
}

/// Parser options, opaque to the graph engine and handed through to
/// whichever parser hook is active.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ParseOptions {
    pub allow_return_outside_function: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub input: InputConfig,
    pub external: ExternalConfig,
    /// Default top-level `this` identifier.
    pub context: Option<String>,
    pub module_context: HashMap<String, String>,
    pub preserve_symlinks: bool,
    pub preserve_modules: bool,
    pub preserve_entry_signatures: PreserveEntrySignatures,
    pub shim_missing_exports: bool,
    pub treeshake: TreeshakeConfig,
    pub cache: Option<bool>,
    pub experimental_cache_expiry: Option<u32>,
    pub strict_deprecations: bool,
    pub parse: ParseOptions,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.unwrap_or(true)
    }

    pub fn cache_expiry(&self) -> u32 {
        self.experimental_cache_expiry.unwrap_or(10)
    }

    pub fn context_for(&self, id: &str) -> String {
        self.module_context
            .get(id)
            .cloned()
            .or_else(|| self.context.clone())
            .unwrap_or_else(|| "undefined".to_string())
    }
}

/// Manual chunk assignment, passed per build: either a name -> seed ids
/// map or a classification function invoked per module id.
#[derive(Clone)]
pub enum ManualChunks {
    Map(IndexMap<String, Vec<String>>),
    Func(Arc<dyn Fn(&str) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for ManualChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualChunks::Map(map) => f.debug_tuple("Map").field(map).finish(),
            ManualChunks::Func(_) => write!(f, "Func"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn diagnostics() -> Diagnostics {
        Diagnostics::new(Some(Arc::new(|_| {})), false)
    }

    #[test]
    fn test_input_forms() {
        let config = Config::from_json(r#"{"input": "src/main.js"}"#).unwrap();
        assert_eq!(
            config.input.entries(),
            vec![("main".to_string(), "src/main.js".to_string())]
        );

        let config = Config::from_json(r#"{"input": {"app": "src/main.js"}}"#).unwrap();
        assert_eq!(
            config.input.entries(),
            vec![("app".to_string(), "src/main.js".to_string())]
        );

        let config = Config::from_json(r#"{"input": ["a.js", "b.js"]}"#).unwrap();
        assert_eq!(config.input.entries().len(), 2);
    }

    #[test]
    fn test_external_patterns() {
        let config = Config::from_json(r#"{"external": ["lodash", "/^node:/"]}"#).unwrap();
        let externals = CompiledExternals::compile(&config.external).unwrap();
        assert!(externals.is_external("lodash", None, false));
        assert!(externals.is_external("node:fs", None, false));
        assert!(!externals.is_external("./local", None, false));
    }

    #[test]
    fn test_treeshake_forms() {
        let config = Config::from_json(r#"{"treeshake": false}"#).unwrap();
        let treeshake = config.treeshake.normalize(None, &diagnostics()).unwrap();
        assert!(!treeshake.enabled);

        let config = Config::from_json(
            r#"{"treeshake": {"annotations": false, "moduleSideEffects": "no-external"}}"#,
        )
        .unwrap();
        let treeshake = config.treeshake.normalize(None, &diagnostics()).unwrap();
        assert!(treeshake.enabled);
        assert!(!treeshake.annotations);
        assert!(!treeshake.module_side_effects.for_module("lodash", true));
        assert!(treeshake.module_side_effects.for_module("/src/a.js", false));
    }

    #[test]
    fn test_pure_external_modules_maps_to_no_external() {
        let config = Config::from_json(r#"{"treeshake": {"pureExternalModules": true}}"#).unwrap();
        let treeshake = config.treeshake.normalize(None, &diagnostics()).unwrap();
        assert!(matches!(
            treeshake.module_side_effects,
            SideEffectsPolicy::NoExternal
        ));

        let strict = Diagnostics::new(Some(Arc::new(|_| {})), true);
        assert!(config.treeshake.normalize(None, &strict).is_err());
    }

    #[test]
    fn test_preserve_entry_signatures() {
        let config = Config::from_json(r#"{"preserveEntrySignatures": "allow-extension"}"#).unwrap();
        assert_eq!(
            config.preserve_entry_signatures,
            PreserveEntrySignatures::AllowExtension
        );
        let config = Config::from_json("{}").unwrap();
        assert_eq!(
            config.preserve_entry_signatures,
            PreserveEntrySignatures::Strict
        );
    }

    #[test]
    fn test_module_context() {
        let config =
            Config::from_json(r#"{"context": "window", "moduleContext": {"/a.js": "globalThis"}}"#)
                .unwrap();
        assert_eq!(config.context_for("/a.js"), "globalThis");
        assert_eq!(config.context_for("/b.js"), "window");
    }
}
