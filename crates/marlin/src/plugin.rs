use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::ast::Program;
use crate::compiler::Context;
use crate::error::CompileError;
use crate::module::ModuleInfoView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveIdResult {
    pub id: String,
    pub external: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PluginResolveParams {
    pub is_entry: bool,
}

/// Hooks the graph engine consumes. All hooks are optional; the
/// driver dispatches them sequentially in registration order.
pub trait Plugin: Any + Send + Sync {
    fn name(&self) -> &str;

    fn build_start(&self, _context: &Arc<Context>) -> Result<()> {
        Ok(())
    }

    fn resolve_id(
        &self,
        _source: &str,
        _importer: Option<&str>,
        _params: &PluginResolveParams,
        _context: &Arc<Context>,
    ) -> Result<Option<ResolveIdResult>> {
        Ok(None)
    }

    fn load(&self, _id: &str, _context: &Arc<Context>) -> Result<Option<String>> {
        Ok(None)
    }

    fn transform(&self, _code: &str, _id: &str, _context: &Arc<Context>) -> Result<Option<String>> {
        Ok(None)
    }

    /// Replaces the built-in parser when it returns a program.
    fn parse(&self, _code: &str, _id: &str, _context: &Arc<Context>) -> Result<Option<Program>> {
        Ok(None)
    }

    fn module_parsed(&self, _info: &ModuleInfoView, _context: &Arc<Context>) -> Result<()> {
        Ok(())
    }

    fn watch_change(&self, _id: &str, _event: &str, _context: &Arc<Context>) -> Result<()> {
        Ok(())
    }

    fn build_end(&self, _context: &Arc<Context>) -> Result<()> {
        Ok(())
    }
}

fn attribute<T>(plugin: &dyn Plugin, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        CompileError::PluginError {
            plugin: plugin.name().to_string(),
            source: e,
        }
        .into()
    })
}

#[derive(Default)]
pub struct PluginDriver {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginDriver {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn build_start(&self, context: &Arc<Context>) -> Result<()> {
        for plugin in &self.plugins {
            attribute(plugin.as_ref(), plugin.build_start(context))?;
        }
        Ok(())
    }

    pub fn resolve_id(
        &self,
        source: &str,
        importer: Option<&str>,
        params: &PluginResolveParams,
        context: &Arc<Context>,
    ) -> Result<Option<ResolveIdResult>> {
        for plugin in &self.plugins {
            if let Some(result) = attribute(
                plugin.as_ref(),
                plugin.resolve_id(source, importer, params, context),
            )? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub fn load(&self, id: &str, context: &Arc<Context>) -> Result<Option<String>> {
        for plugin in &self.plugins {
            if let Some(content) = attribute(plugin.as_ref(), plugin.load(id, context))? {
                return Ok(Some(content));
            }
        }
        Ok(None)
    }

    /// Folds the source through every transform hook in order.
    pub fn transform(&self, code: String, id: &str, context: &Arc<Context>) -> Result<String> {
        let mut code = code;
        for plugin in &self.plugins {
            if let Some(next) = attribute(plugin.as_ref(), plugin.transform(&code, id, context))? {
                code = next;
            }
        }
        Ok(code)
    }

    pub fn parse(&self, code: &str, id: &str, context: &Arc<Context>) -> Result<Option<Program>> {
        for plugin in &self.plugins {
            if let Some(program) = attribute(plugin.as_ref(), plugin.parse(code, id, context))? {
                return Ok(Some(program));
            }
        }
        Ok(None)
    }

    pub fn module_parsed(&self, info: &ModuleInfoView, context: &Arc<Context>) -> Result<()> {
        for plugin in &self.plugins {
            attribute(plugin.as_ref(), plugin.module_parsed(info, context))?;
        }
        Ok(())
    }

    pub fn watch_change(&self, id: &str, event: &str, context: &Arc<Context>) -> Result<()> {
        for plugin in &self.plugins {
            attribute(plugin.as_ref(), plugin.watch_change(id, event, context))?;
        }
        Ok(())
    }

    pub fn build_end(&self, context: &Arc<Context>) -> Result<()> {
        for plugin in &self.plugins {
            attribute(plugin.as_ref(), plugin.build_end(context))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    counter: u32,
    value: serde_json::Value,
}

pub type SerializedPluginCache = HashMap<String, HashMap<String, (u32, serde_json::Value)>>;

/// Per-plugin key-value store carried across builds. Entry counters
/// age on load and reset on access; a snapshot drops entries whose
/// counter reached the configured expiry.
#[derive(Default)]
pub struct PluginCache {
    store: Mutex<HashMap<String, HashMap<String, CacheEntry>>>,
}

impl PluginCache {
    pub fn from_serialized(serialized: SerializedPluginCache) -> Self {
        let store = serialized
            .into_iter()
            .map(|(plugin, entries)| {
                let entries = entries
                    .into_iter()
                    .map(|(key, (counter, value))| {
                        (
                            key,
                            CacheEntry {
                                counter: counter + 1,
                                value,
                            },
                        )
                    })
                    .collect();
                (plugin, entries)
            })
            .collect();
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn get(&self, plugin: &str, key: &str) -> Option<serde_json::Value> {
        let mut store = self.store.lock().unwrap();
        let entry = store.get_mut(plugin)?.get_mut(key)?;
        entry.counter = 0;
        Some(entry.value.clone())
    }

    pub fn set(&self, plugin: &str, key: &str, value: serde_json::Value) {
        let mut store = self.store.lock().unwrap();
        store
            .entry(plugin.to_string())
            .or_default()
            .insert(key.to_string(), CacheEntry { counter: 0, value });
    }

    pub fn snapshot(&self, expiry: u32) -> SerializedPluginCache {
        let mut store = self.store.lock().unwrap();
        for entries in store.values_mut() {
            entries.retain(|_, entry| entry.counter < expiry);
        }
        store
            .iter()
            .map(|(plugin, entries)| {
                let entries = entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), (entry.counter, entry.value.clone())))
                    .collect();
                (plugin.clone(), entries)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_counters_age_on_load_and_reset_on_access() {
        let cache = PluginCache::default();
        cache.set("alias", "react", serde_json::json!("/vendor/react.js"));

        let mut serialized = cache.snapshot(10);
        // Two reload round-trips without access.
        for _ in 0..2 {
            let cache = PluginCache::from_serialized(serialized);
            serialized = cache.snapshot(10);
        }
        assert_eq!(serialized["alias"]["react"].0, 2);

        let cache = PluginCache::from_serialized(serialized);
        assert!(cache.get("alias", "react").is_some());
        let serialized = cache.snapshot(10);
        assert_eq!(serialized["alias"]["react"].0, 0);
    }

    #[test]
    fn test_cache_eviction_at_expiry() {
        let cache = PluginCache::default();
        cache.set("alias", "react", serde_json::json!(1));
        let mut serialized = cache.snapshot(2);
        for _ in 0..2 {
            let cache = PluginCache::from_serialized(serialized);
            serialized = cache.snapshot(2);
        }
        assert!(!serialized
            .get("alias")
            .is_some_and(|entries| entries.contains_key("react")));
    }
}
