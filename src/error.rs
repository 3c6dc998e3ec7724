use thiserror::Error;

/// Errors from sizing or allocating a bucket array.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The requested size cannot be represented in the address space.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// The allocator refused a bucket array.
    #[error("failed to allocate a bucket array of {buckets} buckets")]
    AllocError { buckets: usize },
}
