//! Explicit fan-in of parallel branches
//!
//! Branches are paired with their identity before they start, so results are
//! matched by index and never by completion order. Every failing branch is
//! kept; a stage never reports just the first error.

use std::future::Future;

use eks_common::{BranchError, Error, Result};
use futures::future::join_all;
use tracing::warn;

/// Collects failures of heterogeneous branches joined with `futures::join!`
#[derive(Debug)]
pub struct FanIn {
    stage: String,
    total: usize,
    errors: Vec<BranchError>,
}

impl FanIn {
    /// Fan-in for `total` branches of `stage`
    pub fn new(stage: impl Into<String>, total: usize) -> Self {
        Self {
            stage: stage.into(),
            total,
            errors: Vec::new(),
        }
    }

    /// Keep the value of a successful branch, record a failed one
    pub fn take<T>(&mut self, branch: impl Into<String>, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                let branch = branch.into();
                warn!(stage = %self.stage, branch = %branch, error = %error, "Branch failed");
                self.errors.push(BranchError::new(branch, error));
                None
            }
        }
    }

    /// `Ok` when no branch failed, otherwise every branch error combined
    pub fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::partial(self.stage, self.total, self.errors))
        }
    }
}

/// Run branches concurrently and return their outputs in branch order
///
/// Waits for every branch, then fails with a partial failure naming each
/// failed branch if any did.
pub async fn join_branches<T, F>(stage: &str, branches: Vec<(String, F)>) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>>,
{
    let total = branches.len();
    let (names, futures): (Vec<String>, Vec<F>) = branches.into_iter().unzip();
    let results = join_all(futures).await;

    let mut fan_in = FanIn::new(stage, total);
    let values: Vec<T> = names
        .into_iter()
        .zip(results)
        .filter_map(|(name, result)| fan_in.take(name, result))
        .collect();
    fan_in.finish()?;
    Ok(values)
}

/// Run branches concurrently and return each branch's own result
pub async fn settle_branches<T, F>(branches: Vec<(String, F)>) -> Vec<(String, Result<T>)>
where
    F: Future<Output = Result<T>>,
{
    let (names, futures): (Vec<String>, Vec<F>) = branches.into_iter().unzip();
    names.into_iter().zip(join_all(futures).await).collect()
}
