use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use tracing::debug;

use crate::cache::{BuildCache, SerializedModule};
use crate::chunk::Chunk;
use crate::chunk_graph::ChunkGraph;
use crate::config::{CompiledExternals, Config, ManualChunks, Treeshake};
use crate::diagnostics::{Diagnostics, WarningHandler};
use crate::error::CompileError;
use crate::module::{ModuleId, ModuleInfoView};
use crate::module_graph::ModuleGraph;
use crate::plugin::{Plugin, PluginCache, PluginDriver};
use crate::scope::GlobalScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    LoadAndParse,
    Analyse,
    Generate,
}

/// Structural set of member paths invalidated by writes; value
/// analysis refuses to fold reads that overlap a tracked path.
#[derive(Default)]
pub struct PathTracker {
    paths: HashSet<(ModuleId, Vec<String>)>,
}

impl PathTracker {
    pub fn deoptimize(&mut self, module: ModuleId, path: Vec<String>) -> bool {
        self.paths.insert((module, path))
    }

    /// A read at `path` is deoptimized when a tracked write path and
    /// the read path overlap as prefixes of each other.
    pub fn is_deoptimized(&self, module: &ModuleId, path: &[String]) -> bool {
        self.paths.iter().any(|(m, tracked)| {
            m == module && tracked.iter().zip(path.iter()).all(|(a, b)| a == b)
        })
    }
}

pub struct Context {
    pub config: Config,
    pub treeshake: Treeshake,
    pub externals: CompiledExternals,
    pub module_graph: RwLock<ModuleGraph>,
    pub chunk_graph: RwLock<ChunkGraph>,
    pub plugin_driver: PluginDriver,
    pub plugin_cache: PluginCache,
    pub diagnostics: Diagnostics,
    pub globals: GlobalScope,
    pub deopt_tracker: RwLock<PathTracker>,
    pub watch_files: RwLock<HashSet<String>>,
    pub phase: RwLock<BuildPhase>,
    pub cancelled: AtomicBool,
    /// Serialized modules from a previous build, by id.
    pub module_cache: HashMap<String, SerializedModule>,
}

impl Context {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn add_watch_file(&self, id: &str) {
        self.watch_files.write().unwrap().insert(id.to_string());
    }
}

pub struct Compiler {
    pub context: Arc<Context>,
}

impl Compiler {
    pub fn new(
        config: Config,
        plugins: Vec<Arc<dyn Plugin>>,
        cache: Option<BuildCache>,
        onwarn: Option<WarningHandler>,
    ) -> Result<Self> {
        let diagnostics = Diagnostics::new(onwarn, config.strict_deprecations);
        let treeshake = config.treeshake.normalize(None, &diagnostics)?;
        let externals = CompiledExternals::compile(&config.external)?;
        let plugin_driver = PluginDriver::new(plugins);

        let (module_cache, plugin_cache) = match cache {
            Some(cache) if config.cache_enabled() => (
                cache.modules_by_id(),
                PluginCache::from_serialized(cache.plugins),
            ),
            _ => (HashMap::new(), PluginCache::default()),
        };

        Ok(Self {
            context: Arc::new(Context {
                treeshake,
                externals,
                config,
                module_graph: RwLock::new(ModuleGraph::new()),
                chunk_graph: RwLock::new(ChunkGraph::new()),
                plugin_driver,
                plugin_cache,
                diagnostics,
                globals: GlobalScope::default(),
                deopt_tracker: RwLock::new(PathTracker::default()),
                watch_files: RwLock::new(HashSet::new()),
                phase: RwLock::new(BuildPhase::LoadAndParse),
                cancelled: AtomicBool::new(false),
                module_cache,
            }),
        })
    }

    /// Drives the four phases and returns the chunk descriptors,
    /// non-facades first.
    pub fn build(
        &self,
        manual_chunks: Option<ManualChunks>,
        inline_dynamic: bool,
    ) -> Result<Vec<Chunk>> {
        if self.context.config.input.is_empty() {
            return Err(CompileError::MissingEntries.into());
        }

        *self.context.phase.write().unwrap() = BuildPhase::LoadAndParse;
        self.context.plugin_driver.build_start(&self.context)?;
        debug!("phase: load and parse");
        let (entry_ids, manual_groups) = self.build_module_graph(manual_chunks.as_ref())?;
        if entry_ids.is_empty() {
            return Err(CompileError::MissingEntries.into());
        }
        if self.context.is_cancelled() {
            return Err(CompileError::Cancelled.into());
        }

        *self.context.phase.write().unwrap() = BuildPhase::Analyse;
        debug!("phase: analyse");
        self.link(&entry_ids)?;
        self.include(&entry_ids)?;

        debug!("phase: generate chunks");
        let chunks = self.generate_chunks(&entry_ids, manual_groups, manual_chunks, inline_dynamic)?;
        *self.context.phase.write().unwrap() = BuildPhase::Generate;
        self.context.plugin_driver.build_end(&self.context)?;
        Ok(chunks)
    }

    /// Read-only projection of a module for plugins and embedders.
    pub fn module_info(&self, id: &ModuleId) -> Result<ModuleInfoView> {
        let module_graph = self.context.module_graph.read().unwrap();
        let node = module_graph
            .get_node(id)
            .ok_or_else(|| CompileError::UnknownModule(id.id.clone()))?;
        Ok(match node {
            crate::module::ModuleNode::Normal(module) => Self::info_view_of(module),
            crate::module::ModuleNode::External(external) => ModuleInfoView {
                id: external.id.id.clone(),
                is_entry: false,
                is_external: true,
                is_included: true,
                importers: external.importers.iter().map(|i| i.id.clone()).collect(),
                dynamic_importers: external
                    .dynamic_importers
                    .iter()
                    .map(|i| i.id.clone())
                    .collect(),
                imported_ids: vec![],
                exported_names: external.imported_names.keys().cloned().collect(),
                has_module_side_effects: external.side_effects,
            },
        })
    }

    /// Evicts stale plugin-cache entries and serializes every module
    /// for reuse by a subsequent build.
    pub fn cache_snapshot(&self) -> BuildCache {
        let plugins = self
            .context
            .plugin_cache
            .snapshot(self.context.config.cache_expiry());
        let module_graph = self.context.module_graph.read().unwrap();
        let mut modules: Vec<SerializedModule> = module_graph
            .modules()
            .into_iter()
            .map(SerializedModule::from_module)
            .collect();
        modules.sort_by(|a, b| a.id.cmp(&b.id));
        BuildCache { modules, plugins }
    }

    /// Forwarded filesystem event; dispatched sequentially to plugins.
    pub fn watch_change(&self, id: &str, event: &str) -> Result<()> {
        self.context.plugin_driver.watch_change(id, event, &self.context)
    }

    pub fn watched_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .context
            .watch_files
            .read()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        files.sort();
        files
    }

    /// Stops the loader from scheduling new work; the in-flight build
    /// fails with a cancellation error and returns no chunks.
    pub fn cancel(&self) {
        self.context.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn full_hash(&self) -> u64 {
        let chunk_graph = self.context.chunk_graph.read().unwrap();
        let module_graph = self.context.module_graph.read().unwrap();
        chunk_graph.full_hash(&module_graph)
    }
}
