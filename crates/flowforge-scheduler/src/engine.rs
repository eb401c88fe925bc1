//! The top-level pipeline driver.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use flowforge_config::{ConfigView, TaskScope};
use flowforge_core::{Error, InputLoader, Kind, PipelinePackage, Result, Runner};

use crate::catalog;
use crate::chain::{ChainMode, TaskChainRunner};
use crate::governor::ResourceGovernor;
use crate::graph::{DependencyGraph, Segment, SegmentNode};
use crate::input;
use crate::registry::TaskRegistry;
use crate::store::RecordStore;
use crate::workspace::Workspace;

/// Hard cap on concurrent per-record workers within one block.
const MAX_WORKERS: u32 = 64;

enum Block {
    PerRecord(Vec<Segment>),
    Aggregate(Segment),
}

/// Drives a pipeline run: slices the task list at aggregate boundaries,
/// launches per-record workers, and persists the catalog.
pub struct Engine {
    pipeline: String,
    registry: Arc<TaskRegistry>,
    segments: Vec<Segment>,
    config: Arc<ConfigView>,
    store: Arc<RecordStore>,
    governor: Arc<ResourceGovernor>,
    runner: Arc<dyn Runner>,
    workspace: Arc<Workspace>,
    loader: Arc<dyn InputLoader>,
    results_dir: PathBuf,
}

impl Engine {
    /// Build an engine for one pipeline run. All setup validation happens
    /// here: graph construction, config validation, and settings resolution
    /// for every scheduled node.
    ///
    /// The package's own loader wins over `default_loader`.
    pub fn new(
        package: PipelinePackage,
        config: ConfigView,
        base: impl Into<PathBuf>,
        runner: Arc<dyn Runner>,
        default_loader: Option<Arc<dyn InputLoader>>,
    ) -> Result<Self> {
        let registry = Arc::new(TaskRegistry::from_package(&package));
        let graph = DependencyGraph::build(&registry)?;

        config
            .validate()
            .map_err(|err| Error::Config(err.to_string()))?;
        for segment in graph.segments() {
            for node in segment.nodes() {
                config
                    .settings(&scope_of(node))
                    .map_err(|err| Error::Config(err.to_string()))?;
            }
        }

        let workspace = Arc::new(Workspace::new(base)?);
        let results_dir = workspace.results_dir(&package.name)?;
        let loader = package
            .loader
            .clone()
            .or(default_loader)
            .ok_or_else(|| Error::Config("no input loader provided".to_string()))?;
        let governor = Arc::new(ResourceGovernor::new(
            config.max_threads(),
            config.max_memory(),
        ));

        Ok(Self {
            pipeline: package.name.clone(),
            registry,
            segments: graph.segments().to_vec(),
            config: Arc::new(config),
            store: Arc::new(RecordStore::new()),
            governor,
            runner,
            workspace,
            loader,
            results_dir,
        })
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Execute the pipeline to completion and write the catalog.
    pub async fn run(&self) -> Result<()> {
        info!(pipeline = %self.pipeline, "Starting pipeline");

        self.store.seed(self.loader.load().await?);
        let preloaded = input::load_requested(
            self.config.input_requests(),
            &self.workspace.base().join("results"),
        )?;
        self.store.merge_root(preloaded);

        for block in self.blocks()? {
            match block {
                Block::PerRecord(segments) => self.run_record_block(&segments).await?,
                Block::Aggregate(segment) => {
                    info!(task = %segment.pipeline_node().name, "Running aggregate");
                    self.chain()
                        .run_segments(&ChainMode::Store, std::slice::from_ref(&segment))
                        .await?;
                }
            }
        }

        let catalog_path = self
            .results_dir
            .join(format!("{}.catalog", self.pipeline));
        catalog::write(&catalog_path, &self.store.catalog_snapshot())?;
        info!(pipeline = %self.pipeline, catalog = %catalog_path.display(), "Pipeline complete");
        Ok(())
    }

    /// Cut the segment list at every aggregate, yielding alternating
    /// per-record and aggregate blocks. The slicing is what guarantees
    /// aggregates see a quiescent store.
    fn blocks(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut current: Vec<Segment> = Vec::new();
        for segment in &self.segments {
            let kind = self.registry.get(&segment.pipeline_node().name)?.kind();
            if kind == Kind::Aggregate {
                if !current.is_empty() {
                    blocks.push(Block::PerRecord(std::mem::take(&mut current)));
                }
                blocks.push(Block::Aggregate(segment.clone()));
            } else {
                current.push(segment.clone());
            }
        }
        if !current.is_empty() {
            blocks.push(Block::PerRecord(current));
        }
        Ok(blocks)
    }

    /// Run one per-record block: one chain per live record, bounded by the
    /// block's worker budget. Every worker drains before the first failure
    /// propagates.
    async fn run_record_block(&self, segments: &[Segment]) -> Result<()> {
        let workers = self.worker_count(segments)?;
        info!(workers, segments = segments.len(), "Running per-record block");
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();

        for id in self.store.record_ids() {
            // Rows named after tasks are synthetic aggregate results, not
            // schedulable records.
            if self.registry.contains(id.as_str()) {
                continue;
            }
            let chain = self.chain();
            let segments = segments.to_vec();
            let semaphore = Arc::clone(&semaphore);
            let mode = ChainMode::Record(id);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore never closes");
                chain.run_segments(&mode, &segments).await
            });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "Record chain failed");
                    first_err.get_or_insert(err);
                }
                Err(join_err) => {
                    first_err.get_or_insert(Error::ExecutionFailed(format!(
                        "record worker panicked: {join_err}"
                    )));
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// `min(MaxThreads / minThreads, MaxMemory / minMemory, 64)` over the
    /// block's nodes, and at least one.
    fn worker_count(&self, segments: &[Segment]) -> Result<usize> {
        let mut min_threads = self.config.max_threads();
        let mut min_memory = self.config.max_memory();
        for segment in segments {
            for node in segment.nodes() {
                let settings = self
                    .config
                    .settings(&scope_of(node))
                    .map_err(|err| Error::Config(err.to_string()))?;
                min_threads = min_threads.min(settings.threads);
                min_memory = min_memory.min(settings.memory);
            }
        }
        let by_threads = (self.config.max_threads() / min_threads.max(1)).max(1);
        let by_memory = (self.config.max_memory() / min_memory.max(1)).max(1);
        Ok(by_threads.min(by_memory).min(MAX_WORKERS) as usize)
    }

    fn chain(&self) -> TaskChainRunner {
        TaskChainRunner::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.governor),
            Arc::clone(&self.runner),
            Arc::clone(&self.workspace),
            self.results_dir.clone(),
        )
    }
}

fn scope_of(node: &SegmentNode) -> TaskScope {
    if node.is_pipeline() {
        TaskScope::pipeline(&node.name)
    } else {
        TaskScope::dependency(&node.scope, &node.name)
    }
}
