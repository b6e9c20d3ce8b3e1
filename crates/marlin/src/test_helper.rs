//! In-memory filesystem plugin used by the test suites and by
//! embedders that drive builds over virtual sources.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::compiler::Context;
use crate::plugin::{Plugin, PluginResolveParams, ResolveIdResult};
use crate::resolve::normalize_path;

pub struct MemoryFs {
    files: HashMap<String, String>,
}

impl MemoryFs {
    pub fn new(files: HashMap<String, String>) -> Self {
        Self { files }
    }

    fn probe(&self, path: &Path) -> Option<String> {
        let base = path.to_string_lossy().to_string();
        for candidate in [
            base.clone(),
            format!("{}.js", base),
            format!("{}/index.js", base),
        ] {
            if self.files.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

impl Plugin for MemoryFs {
    fn name(&self) -> &str {
        "memory-fs"
    }

    fn resolve_id(
        &self,
        source: &str,
        importer: Option<&str>,
        _params: &PluginResolveParams,
        _context: &Arc<Context>,
    ) -> Result<Option<ResolveIdResult>> {
        let joined = if source.starts_with('/') {
            PathBuf::from(source)
        } else if source.starts_with("./") || source.starts_with("../") {
            match importer {
                Some(importer) => Path::new(importer)
                    .parent()
                    .unwrap_or(Path::new("/"))
                    .join(source),
                None => PathBuf::from(source),
            }
        } else {
            return Ok(None);
        };
        Ok(self
            .probe(&normalize_path(&joined))
            .map(|id| ResolveIdResult {
                id,
                external: false,
            }))
    }

    fn load(&self, id: &str, _context: &Arc<Context>) -> Result<Option<String>> {
        Ok(self.files.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;

    use super::*;
    use crate::compiler::Compiler;
    use crate::config::Config;

    #[test]
    fn test_memory_fs_resolution_and_probing() {
        let fs = MemoryFs::new(hashmap! {
            "/src/main.js".to_string() => "export const x = 1;".to_string(),
            "/src/lib/index.js".to_string() => "export const y = 2;".to_string(),
        });
        let compiler = Compiler::new(Config::default(), vec![], None, None).unwrap();
        let params = PluginResolveParams { is_entry: false };

        let resolved = fs
            .resolve_id("./lib", Some("/src/main.js"), &params, &compiler.context)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "/src/lib/index.js");

        let missing = fs
            .resolve_id("./nope", Some("/src/main.js"), &params, &compiler.context)
            .unwrap();
        assert!(missing.is_none());

        // Bare specifiers fall through to external classification.
        let bare = fs
            .resolve_id("lodash", Some("/src/main.js"), &params, &compiler.context)
            .unwrap();
        assert!(bare.is_none());
    }
}
