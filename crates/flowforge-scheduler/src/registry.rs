//! The task blueprint registry.

use std::collections::HashMap;

use flowforge_core::{Error, PipelinePackage, Result, TaskKind};

/// Flat `name -> TaskKind` map. Names are case-sensitive. Dependency
/// entries overwrite pipeline entries on collision; that is the supported
/// way to swap in an alternate implementation of a named step.
pub struct TaskRegistry {
    tasks: HashMap<String, TaskKind>,
    pipeline: Vec<String>,
}

impl TaskRegistry {
    pub fn from_package(package: &PipelinePackage) -> Self {
        let mut tasks = HashMap::new();
        let mut pipeline = Vec::new();
        for task in &package.tasks {
            pipeline.push(task.name.clone());
            tasks.insert(task.name.clone(), task.clone());
        }
        for task in &package.dependencies {
            tasks.insert(task.name.clone(), task.clone());
        }
        Self { tasks, pipeline }
    }

    pub fn get(&self, name: &str) -> Result<&TaskKind> {
        self.tasks
            .get(name)
            .ok_or_else(|| Error::UnknownTaskRef(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Pipeline task names in registration order.
    pub fn pipeline_tasks(&self) -> &[String] {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowforge_core::{Outputs, PerRecordTask, TaskContext};

    struct Noop;

    #[async_trait]
    impl PerRecordTask for Noop {
        fn outputs(&self, _ctx: &TaskContext) -> Outputs {
            Outputs::new()
        }

        async fn run(&self, _ctx: &TaskContext) -> flowforge_core::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_dependency_entries_overwrite_pipeline_entries() {
        let package = PipelinePackage::new("demo")
            .task(TaskKind::per_record("Align", Noop).require("Load"))
            .dependency(TaskKind::per_record("Align", Noop));
        let registry = TaskRegistry::from_package(&package);

        // Pipeline order is preserved, but the blueprint is the override.
        assert_eq!(registry.pipeline_tasks(), ["Align"]);
        assert!(registry.get("Align").unwrap().requires.is_empty());
    }

    #[test]
    fn test_unknown_name_errors() {
        let registry = TaskRegistry::from_package(&PipelinePackage::new("demo"));
        assert!(matches!(
            registry.get("Missing"),
            Err(Error::UnknownTaskRef(_))
        ));
    }
}
