#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Malformed database address string.
    InvalidAddress(String),
    /// `local_only` was requested but no local manifest exists.
    UnknownDatabase(String),
    /// Manifest type does not match the requested type.
    TypeMismatch { expected: String, found: String },
    /// Requested store type is not in the known set.
    InvalidType(String),
    /// `create` on an extant address without `overwrite`.
    AlreadyExists(String),
    /// Access controller rejects the entry's key.
    NotAuthorized,
    /// Signature or content-hash check failed.
    InvalidEntry(String),
    /// Structurally broken entry (bad JSON, bad CID strings, bad clock).
    MalformedEntry(String),
    /// Terminal object-store failure for a CID.
    FetchFailed(String),
    /// Temporary object-store or transport failure; retried internally.
    TransportTransient(String),
    /// Object store refused or failed a write.
    Store(String),
    /// Local cache failure.
    Cache(String),
    /// Gossip bus failure.
    Gossip(String),
    /// Operation on a closed coordinator.
    Closed,
    NotImplemented,
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::InvalidAddress(s) => write!(f, "invalid address: {}", s),
            DbError::UnknownDatabase(s) => write!(f, "unknown database: {}", s),
            DbError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            DbError::InvalidType(s) => write!(f, "invalid store type: {}", s),
            DbError::AlreadyExists(s) => write!(f, "database already exists: {}", s),
            DbError::NotAuthorized => write!(f, "key is not allowed to append"),
            DbError::InvalidEntry(s) => write!(f, "invalid entry: {}", s),
            DbError::MalformedEntry(s) => write!(f, "malformed entry: {}", s),
            DbError::FetchFailed(s) => write!(f, "fetch failed: {}", s),
            DbError::TransportTransient(s) => write!(f, "transient transport failure: {}", s),
            DbError::Store(s) => write!(f, "object store: {}", s),
            DbError::Cache(s) => write!(f, "cache: {}", s),
            DbError::Gossip(s) => write!(f, "gossip: {}", s),
            DbError::Closed => write!(f, "coordinator is closed"),
            DbError::NotImplemented => write!(f, "not implemented"),
        }
    }
}

impl std::error::Error for DbError {}
