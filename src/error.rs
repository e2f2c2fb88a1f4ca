/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, mostly the `file:line-no` of the
/// function returning the error, and a message telling cause of the
/// error.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Internal failure, tree invariant got violated.
    Fatal(String, String),
    /// API used with invalid argument or in invalid configuration,
    /// like a key operation on an index without comparator.
    InvalidInput(String, String),
    /// Persisted file or record failed magic/version/layout check.
    InvalidFile(String, String),
    /// Key, or index, not present in the tree.
    KeyNotFound(String, String),
    /// Unique-mode insert found the key already present.
    KeyExists(String, String),
    /// Index outside the valid range for the operation.
    OutOfBound(String, String),
    /// Page cache has no evictable buffer left, all pinned.
    CacheExhausted(String, String),
    /// Error from the underlying record store or file system.
    IOError(String, String),
    /// Mutation attempted on a read-only handle.
    ReadOnly(String, String),
    /// Mutation attempted after the index was finalized.
    Finalized(String, String),
}
