pub type Result<T, E = DbError> = core::result::Result<T, E>;

/// Errors returned by the in-memory database.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    /// The database was configured as unreachable.
    #[error("database `{database}` is unreachable")]
    Unreachable { database: String },

    /// The handle was disconnected.
    #[error("database `{database}` is disconnected")]
    Disconnected { database: String },

    /// Only JSON objects can be stored.
    #[error("documents must be JSON objects")]
    NotADocument,

    /// A document without an `_id` (or `id`) field.
    #[error("document has no `_id` field")]
    MissingId,

    /// A document with the same `_id` already exists.
    #[error("duplicate key {id} in collection `{collection}`")]
    DuplicateKey { collection: String, id: String },
}
