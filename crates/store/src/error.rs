//! Store error types

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("failed to encode batch record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt record for key '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub(crate) fn io<'a>(
        op: &'static str,
        path: &'a Path,
    ) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_op_and_path() {
        let path = PathBuf::from("/var/lib/settle/pending/abc.jsonl");
        let err = StoreError::io("append to pending batch", &path)(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        ));

        let message = err.to_string();
        assert!(message.starts_with(
            "append to pending batch failed for /var/lib/settle/pending/abc.jsonl"
        ));
        assert!(message.contains("read-only filesystem"));
        assert!(matches!(err, StoreError::Io { op: "append to pending batch", .. }));
    }
}
