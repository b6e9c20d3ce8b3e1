use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::module::Module;
use crate::plugin::SerializedPluginCache;

/// Stable, implementation-private record of one built module. Enough
/// to skip the load/transform pipeline on an unchanged source; the
/// program is re-derived by the parser on reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedModule {
    pub id: String,
    pub transformed_code: String,
    pub source_hash: u64,
    pub raw_hash: u64,
    pub sources: Vec<String>,
    pub resolved_ids: Vec<(String, String, bool)>,
    pub exported_names: Vec<String>,
    pub side_effects: bool,
    pub reassigned_names: Vec<String>,
}

impl SerializedModule {
    pub fn from_module(module: &Module) -> Self {
        Self {
            id: module.id.id.clone(),
            transformed_code: module.raw.clone(),
            source_hash: module.source_hash,
            raw_hash: module.raw_hash,
            sources: module.sources.clone(),
            resolved_ids: module
                .resolved_ids
                .iter()
                .map(|(source, resolved)| {
                    (source.clone(), resolved.id.id.clone(), resolved.external)
                })
                .collect(),
            exported_names: module.exported_names(),
            side_effects: module.side_effects,
            reassigned_names: module
                .scope
                .variables()
                .filter(|(_, v)| v.reassigned)
                .map(|(_, v)| v.name.clone())
                .collect(),
        }
    }
}

/// Persisted state handed back to the next build via the `cache`
/// option.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildCache {
    pub modules: Vec<SerializedModule>,
    pub plugins: SerializedPluginCache,
}

impl BuildCache {
    pub fn modules_by_id(&self) -> HashMap<String, SerializedModule> {
        self.modules
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParseOptions, Treeshake};
    use crate::module::ModuleId;
    use crate::parse::parse;
    use crate::scope::GlobalScope;

    #[test]
    fn test_serialize_round_trip() {
        let source = "export const x = 1;\nlet n = 0;\nn = n + 1;";
        let mut module = Module::placeholder(ModuleId::new("/src/a.js"), true);
        let program = parse(source, &ParseOptions::default()).unwrap();
        module.set_program(
            source.to_string(),
            program,
            &Treeshake::default(),
            &GlobalScope::default(),
        );

        let serialized = SerializedModule::from_module(&module);
        assert_eq!(serialized.id, "/src/a.js");
        assert_eq!(serialized.exported_names, vec!["x"]);
        assert_eq!(serialized.reassigned_names, vec!["n"]);

        let cache = BuildCache {
            modules: vec![serialized],
            plugins: Default::default(),
        };
        let json = serde_json::to_string(&cache).unwrap();
        let restored: BuildCache = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.modules[0].raw_hash, module.raw_hash);
        assert!(restored.modules_by_id().contains_key("/src/a.js"));
    }
}
