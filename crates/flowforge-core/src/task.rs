//! Task blueprints and the author-facing hook traits.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::TaskContext;
use crate::loader::InputLoader;
use crate::result::{LabelMap, Outputs};
use crate::{RecordId, Result};

/// Name of the implicit root scope: the record input produced by the loader
/// rather than by any task.
pub const ROOT_SCOPE: &str = "root";

/// How labels are pulled from a prior result into a dependency's input.
#[derive(Debug, Clone)]
pub enum Rename {
    /// Copy each `from` label under the new name `to`.
    Mapped(BTreeMap<String, String>),
    /// Copy labels verbatim.
    Verbatim(Vec<String>),
}

/// One `{source -> rename}` entry of a dependency's collect_by map. The
/// source is a task name, or [`ROOT_SCOPE`] for the record's root input.
#[derive(Debug, Clone)]
pub struct Collect {
    pub source: String,
    pub rename: Rename,
}

impl Collect {
    pub fn mapped<I, S>(source: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            source: source.into(),
            rename: Rename::Mapped(
                pairs
                    .into_iter()
                    .map(|(from, to)| (from.into(), to.into()))
                    .collect(),
            ),
        }
    }

    pub fn verbatim<I, S>(source: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: source.into(),
            rename: Rename::Verbatim(labels.into_iter().map(Into::into).collect()),
        }
    }
}

/// Reference to another task kind that runs as an inlined dependency.
///
/// Without a collect_by map the dependency inherits the record's full
/// current input; with one, its input is exactly the renamed labels.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub task: String,
    pub collect_by: Option<Vec<Collect>>,
}

impl DependencySpec {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            collect_by: None,
        }
    }

    pub fn collect(mut self, collect: Collect) -> Self {
        self.collect_by.get_or_insert_with(Vec::new).push(collect);
        self
    }
}

/// An acceptable external-program version, plus the argument used to probe
/// for it (e.g. `--version`).
#[derive(Debug, Clone)]
pub struct VersionSpec {
    pub version: String,
    pub probe_arg: String,
    /// Probe this program instead of the configured one.
    pub program: Option<String>,
}

impl VersionSpec {
    pub fn new(version: impl Into<String>, probe_arg: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            probe_arg: probe_arg.into(),
            program: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }
}

/// Which flavor of body a task kind carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Invoked once per record, independently.
    PerRecord,
    /// Invoked once with the entire current record set as input.
    Aggregate,
}

impl Kind {
    pub fn label(self) -> &'static str {
        match self {
            Kind::PerRecord => "per-record",
            Kind::Aggregate => "aggregate",
        }
    }
}

/// Hooks implemented by a per-record pipeline step.
#[async_trait]
pub trait PerRecordTask: Send + Sync {
    /// Declared outputs, computed before the body runs. Path-typed entries
    /// must exist on disk once `run` completes.
    fn outputs(&self, ctx: &TaskContext) -> Outputs;

    /// Optional gate; `None` means unconditional. A `false` return makes the
    /// task a no-op with an empty result.
    fn condition(&self, _ctx: &TaskContext) -> Option<bool> {
        None
    }

    /// The task body.
    async fn run(&self, ctx: &TaskContext) -> Result<()>;
}

/// Replacement record set produced by an aggregate's `deaggregate` hook.
#[derive(Debug, Clone, Default)]
pub struct Deaggregated {
    pub records: BTreeMap<RecordId, LabelMap>,
    /// Replace the record set wholesale instead of updating it in place.
    pub remap: bool,
}

impl Deaggregated {
    pub fn update(records: BTreeMap<RecordId, LabelMap>) -> Self {
        Self {
            records,
            remap: false,
        }
    }

    pub fn remap(records: BTreeMap<RecordId, LabelMap>) -> Self {
        Self {
            records,
            remap: true,
        }
    }
}

/// Hooks implemented by an aggregate pipeline step.
#[async_trait]
pub trait AggregateTask: Send + Sync {
    fn outputs(&self, ctx: &TaskContext) -> Outputs;

    fn condition(&self, _ctx: &TaskContext) -> Option<bool> {
        None
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()>;

    /// Distribute the aggregate result back over records. Returning `None`
    /// stores the aggregate output under a synthetic record named after the
    /// task.
    fn deaggregate(&self, _ctx: &TaskContext) -> Option<Deaggregated> {
        None
    }
}

/// A task kind's body: the kind tag and the matching hook set.
#[derive(Clone)]
pub enum TaskBody {
    PerRecord(Arc<dyn PerRecordTask>),
    Aggregate(Arc<dyn AggregateTask>),
}

impl TaskBody {
    pub fn kind(&self) -> Kind {
        match self {
            TaskBody::PerRecord(_) => Kind::PerRecord,
            TaskBody::Aggregate(_) => Kind::Aggregate,
        }
    }
}

impl std::fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskBody::{:?}", self.kind())
    }
}

/// A registered pipeline step blueprint: a name, its ordering relations, and
/// the hooks that implement it.
#[derive(Debug, Clone)]
pub struct TaskKind {
    pub name: String,
    /// Tasks that must complete before this one; their outputs are visible
    /// to this task's input.
    pub requires: Vec<String>,
    /// Dependency tasks inlined into this task's segment.
    pub depends: Vec<DependencySpec>,
    /// Acceptable external-program versions; empty means unchecked.
    pub versions: Vec<VersionSpec>,
    pub body: TaskBody,
}

impl TaskKind {
    pub fn per_record(name: impl Into<String>, body: impl PerRecordTask + 'static) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            depends: Vec::new(),
            versions: Vec::new(),
            body: TaskBody::PerRecord(Arc::new(body)),
        }
    }

    pub fn aggregate(name: impl Into<String>, body: impl AggregateTask + 'static) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            depends: Vec::new(),
            versions: Vec::new(),
            body: TaskBody::Aggregate(Arc::new(body)),
        }
    }

    pub fn require(mut self, task: impl Into<String>) -> Self {
        self.requires.push(task.into());
        self
    }

    pub fn depend(mut self, spec: DependencySpec) -> Self {
        self.depends.push(spec);
        self
    }

    pub fn version(mut self, spec: VersionSpec) -> Self {
        self.versions.push(spec);
        self
    }

    pub fn kind(&self) -> Kind {
        self.body.kind()
    }
}

/// A pipeline package: the value a pipeline author's registration function
/// returns. Dependency entries overwrite pipeline entries on name collision,
/// which is the supported mechanism for swapping alternate implementations
/// of a named step.
pub struct PipelinePackage {
    pub name: String,
    pub tasks: Vec<TaskKind>,
    pub dependencies: Vec<TaskKind>,
    /// Loader producing the initial record set; when absent the engine's
    /// caller supplies a default extension-based loader.
    pub loader: Option<Arc<dyn InputLoader>>,
}

impl PipelinePackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            dependencies: Vec::new(),
            loader: None,
        }
    }

    pub fn task(mut self, task: TaskKind) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn dependency(mut self, task: TaskKind) -> Self {
        self.dependencies.push(task);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn InputLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}
