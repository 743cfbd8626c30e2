//! Vault2 error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The vault2 error type, used across all vault2 apis.
///
/// The variants are domain kinds, not transport kinds: callers categorise on
/// them to decide between reply, drop, and create-on-put semantics. The type
/// is `Clone` so results can ride in shared futures and be replayed to every
/// sender accumulated for a message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VaultError {
    /// The named group is not in the registry.
    #[error("no such account")]
    NoSuchAccount,

    /// The group exists but holds no record under the requested key.
    #[error("no such element")]
    NoSuchElement,

    /// `add_group` was asked to insert a group name already registered.
    #[error("account already exists")]
    AccountAlreadyExists,

    /// Backend I/O failure or group-id space exhaustion.
    #[error("failed to handle request: {ctx} (src: {src})")]
    FailedToHandleRequest {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// A record commit chose `Put` without supplying a value.
    #[error("null pointer: put committed without a value")]
    NullPointer,

    /// A version tree already has a different root.
    #[error("cannot overwrite existing root")]
    CannotOverwriteExistingRoot,

    /// The version being inserted already exists under a different parent.
    #[error("version already exists")]
    VersionAlreadyExists,

    /// `delete_branch_until_fork` was given a name that is not a tip.
    #[error("no branch to delete")]
    NoBranchToDelete,

    /// The requested version is not in the tree.
    #[error("version not found")]
    VersionNotFound,

    /// A message wrapper or action body failed to parse.
    #[error("invalid message: {0}")]
    InvalidMessage(Arc<str>),
}

impl VaultError {
    /// Construct a [VaultError::FailedToHandleRequest] with an inner source
    /// error.
    pub fn failed_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::FailedToHandleRequest {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct a [VaultError::FailedToHandleRequest] from context alone.
    pub fn failed<C: std::fmt::Display>(ctx: C) -> Self {
        Self::FailedToHandleRequest {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a [VaultError::InvalidMessage].
    pub fn invalid_message<C: std::fmt::Display>(ctx: C) -> Self {
        Self::InvalidMessage(ctx.to_string().into_boxed_str().into())
    }
}

/// The vault2 result type.
pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            "failed to handle request: bla (src: None)",
            VaultError::failed("bla").to_string().as_str(),
        );
        assert_eq!(
            "failed to handle request: foo (src: bar)",
            VaultError::failed_src("foo", std::io::Error::other("bar"))
                .to_string()
                .as_str(),
        );
        assert_eq!(
            "no such account",
            VaultError::NoSuchAccount.to_string().as_str(),
        );
    }

    #[test]
    fn ensure_error_type_is_send_and_sync() {
        fn ensure<T: std::fmt::Display + Send + Sync + Clone>(_t: T) {}
        ensure(VaultError::failed("bla"));
    }
}
