use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::compiler::Context;
use crate::error::CompileError;
use crate::module::{ModuleId, ResolvedId};
use crate::plugin::PluginResolveParams;

/// Resolves one specifier: plugin chain, then the `external` option,
/// then the default relative resolver. Bare specifiers that nothing
/// claims are fatal.
pub fn resolve(
    specifier: &str,
    importer: Option<&ModuleId>,
    is_entry: bool,
    context: &Arc<Context>,
) -> Result<ResolvedId> {
    let params = PluginResolveParams { is_entry };
    if let Some(result) = context.plugin_driver.resolve_id(
        specifier,
        importer.map(|i| i.id.as_str()),
        &params,
        context,
    )? {
        return Ok(ResolvedId {
            id: ModuleId::new(result.id),
            external: result.external,
        });
    }

    if context
        .externals
        .is_external(specifier, importer.map(|i| i.id.as_str()), false)
    {
        return Ok(ResolvedId {
            id: ModuleId::new(specifier),
            external: true,
        });
    }

    let is_path = specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/');
    if !is_path {
        return Err(CompileError::UnresolvedImport {
            specifier: specifier.to_string(),
            importer: importer.map(|i| i.id.clone()),
        }
        .into());
    }

    let joined = match importer {
        Some(importer) if !specifier.starts_with('/') => {
            let importer_path = Path::new(&importer.id);
            let parent = importer_path.parent().unwrap_or(Path::new("/"));
            parent.join(specifier)
        }
        _ => PathBuf::from(specifier),
    };
    let normalized = normalize_path(&joined);

    let resolved = probe(&normalized).ok_or_else(|| CompileError::UnresolvedImport {
        specifier: specifier.to_string(),
        importer: importer.map(|i| i.id.clone()),
    })?;

    let resolved = if context.config.preserve_symlinks {
        resolved
    } else {
        resolved.canonicalize().unwrap_or(resolved)
    };
    let id = resolved.to_string_lossy().to_string();
    debug!("resolved {} -> {}", specifier, id);

    let external = context
        .externals
        .is_external(&id, importer.map(|i| i.id.as_str()), true);
    Ok(ResolvedId {
        id: ModuleId::new(id),
        external,
    })
}

/// Extension probing over the real filesystem: as-is, `.js`, `/index.js`.
fn probe(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let with_ext = PathBuf::from(format!("{}.js", path.to_string_lossy()));
    if with_ext.is_file() {
        return Some(with_ext);
    }
    let index = path.join("index.js");
    if index.is_file() {
        return Some(index);
    }
    None
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem, so virtual ids resolve the same as on-disk ones.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<std::ffi::OsString> = vec![];
    let mut prefix = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix.push(p.as_os_str()),
            Component::RootDir => prefix.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    parts.push("..".into());
                }
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
        }
    }
    let mut result = prefix;
    for part in parts {
        result.push(part);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/src/pages/../lib/./util.js")),
            PathBuf::from("/src/lib/util.js")
        );
        assert_eq!(
            normalize_path(Path::new("/src/a.js")),
            PathBuf::from("/src/a.js")
        );
    }
}
