//! Input loading.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::result::LabelMap;
use crate::{RecordId, Result};

/// Produces the initial per-record input set for a pipeline run.
///
/// Each record's labels form the record's root input; downstream tasks read
/// them through their input view or through a collect_by entry sourced from
/// the root scope.
#[async_trait]
pub trait InputLoader: Send + Sync {
    async fn load(&self) -> Result<BTreeMap<RecordId, LabelMap>>;
}
