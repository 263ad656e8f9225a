//! Exposes the deimos error type

use std::sync::PoisonError;

use ash::vk;
use thiserror::Error;

/// Error type that deimos can return.
#[derive(Error, Debug)]
pub enum Error {
    /// Two passes with the same qualified name were registered in one graph.
    #[error("Duplicate pass name `{0}`.")]
    DuplicatePassName(String),
    /// `compile()` was called on a graph with no registered passes.
    #[error("Cannot compile an empty graph.")]
    EmptyGraph,
    /// Dependency analysis found no pass without a producer.
    #[error("No root to start with.")]
    NoRoot,
    /// Dependency analysis found no pass without a consumer.
    #[error("No leaf to end with.")]
    NoLeaf,
    /// Pairing a producer with a consumer would introduce a cycle.
    #[error("Adding dependency `{0}` -> `{1}` would create a cycle.")]
    CyclicDependency(String, String),
    /// Generic Vulkan error, tagged with the step that failed.
    #[error("Vulkan error during {step}: `{result}`")]
    VkError {
        step: &'static str,
        result: vk::Result,
    },
    /// Vulkan allocation error.
    #[error("Vulkan allocation error: `{0}`")]
    AllocationError(gpu_allocator::AllocationError),
    /// Node not found in graph. Generally this should not happen.
    #[error("Implementation error. Node not found.")]
    NodeNotFound,
    /// A pass referenced by id does not exist in the graph.
    #[error("Pass `{0}` not found.")]
    PassNotFound(String),
    /// An attachment declaration was inconsistent with its pass.
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(&'static str),
    /// No clear value was specified even though one was required.
    #[error("No clear value specified for an attachment with a `CLEAR` load op.")]
    NoClearValue,
    /// A pass-index resolved to a view that has no physical image view yet.
    #[error("No image view bound for attachment `{0}`.")]
    NoResourceBound(String),
    /// A runnable was requested for a pass that declared no creator.
    #[error("Pass `{0}` has no runnable creator.")]
    NoRunnableCreator(String),
    /// Poisoned mutex
    #[error("Poisoned mutex")]
    PoisonError,
}

impl From<gpu_allocator::AllocationError> for Error {
    fn from(value: gpu_allocator::AllocationError) -> Self {
        Error::AllocationError(value)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}

/// Checks a [`vk::Result`], mapping failure to [`Error::VkError`] tagged with
/// the failing step.
pub fn check_vk(step: &'static str, result: vk::Result) -> Result<(), Error> {
    if result == vk::Result::SUCCESS {
        Ok(())
    } else {
        Err(Error::VkError {
            step,
            result,
        })
    }
}

/// Maps an `ash` call result to [`Error::VkError`] tagged with the failing step.
pub fn map_vk<T>(step: &'static str, result: ash::prelude::VkResult<T>) -> Result<T, Error> {
    result.map_err(|result| Error::VkError {
        step,
        result,
    })
}
