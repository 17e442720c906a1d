//! Seams between the worker-pool pipeline and the things it drives.
//!
//! The pipeline itself only knows how to hand out workers, run a bounded
//! number of processing calls and forward results. Creating workers, doing
//! the per-item work and persisting results are supplied through these traits.

use crate::{ItemResult, ScrapeError};
use async_trait::async_trait;

/// An input record the pipeline can process.
pub trait WorkItem: Send + Sync + 'static {
    /// The processing target, or `None` when it is empty or unusable.
    ///
    /// Items without a target are never handed to the processor; they still
    /// produce a result with an absent outcome.
    fn target(&self) -> Option<String>;

    /// Human-readable name used in log lines.
    fn label(&self) -> String;
}

/// Creates and destroys the expensive resources owned by the pool.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;

    /// Called once per pool slot at startup.
    async fn create(&self, id: usize) -> Result<Self::Resource, ScrapeError>;

    /// Called exactly once per created resource at teardown.
    async fn destroy(&self, id: usize, resource: Self::Resource) -> Result<(), ScrapeError>;
}

/// The per-item operation run with an exclusively borrowed resource.
#[async_trait]
pub trait ItemProcessor<R: Send, I: Sync>: Send + Sync + 'static {
    type Outcome: Send + 'static;

    async fn process(
        &self,
        resource: &mut R,
        item: &I,
        target: &str,
    ) -> Result<Self::Outcome, ScrapeError>;
}

/// Receives results in completion order.
#[async_trait]
pub trait ResultSink<I: Send, O: Send>: Send {
    async fn consume(&mut self, result: ItemResult<I, O>) -> Result<(), ScrapeError>;

    /// Called once after the last result, before the pool is torn down.
    async fn finish(&mut self) -> Result<(), ScrapeError> {
        Ok(())
    }
}
