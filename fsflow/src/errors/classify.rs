//! Mapping of raw failures to [`OpError`].

use super::{ErrorCode, OpError};
use std::error::Error as StdError;
use std::io;
use std::path::Path;

/// Classifies any error chain into a typed [`OpError`].
///
/// An `OpError` found anywhere in the chain is returned as-is. The first
/// `io::Error` in the chain is classified by errno, then by kind. Everything
/// else becomes [`ErrorCode::Unknown`].
#[must_use]
pub fn classify(
    error: &(dyn StdError + 'static),
    operation: &str,
    path: Option<&Path>,
) -> OpError {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(typed) = err.downcast_ref::<OpError>() {
            return typed.clone();
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return classify_io(io_err, operation, path);
        }
        if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            let op = OpError::new(ErrorCode::Timeout, operation, err.to_string());
            return attach_path(op, path);
        }
        current = err.source();
    }

    attach_path(OpError::new(ErrorCode::Unknown, operation, error.to_string()), path)
}

/// Classifies an I/O error.
#[must_use]
pub fn classify_io(error: &io::Error, operation: &str, path: Option<&Path>) -> OpError {
    // io::Error::other(OpError) round-trips through the fs layer.
    if let Some(typed) = error.get_ref().and_then(|inner| inner.downcast_ref::<OpError>()) {
        return typed.clone();
    }

    let code = error
        .raw_os_error()
        .and_then(code_from_errno)
        .unwrap_or_else(|| code_from_kind(error.kind()));

    let op = OpError::new(code, operation, error.to_string()).with_details(serde_json::json!({
        "kind": format!("{:?}", error.kind()),
        "errno": error.raw_os_error(),
    }));
    attach_path(op, path)
}

fn attach_path(op: OpError, path: Option<&Path>) -> OpError {
    match path {
        Some(p) if op.path.is_none() => op.with_path(p),
        _ => op,
    }
}

fn code_from_kind(kind: io::ErrorKind) -> ErrorCode {
    use io::ErrorKind as K;
    match kind {
        K::NotFound => ErrorCode::NotFound,
        K::PermissionDenied => ErrorCode::PermissionDenied,
        K::AlreadyExists => ErrorCode::AlreadyExists,
        K::WouldBlock => ErrorCode::Busy,
        K::TimedOut => ErrorCode::Timeout,
        K::Interrupted => ErrorCode::Interrupted,
        K::ConnectionRefused
        | K::ConnectionReset
        | K::ConnectionAborted
        | K::NotConnected
        | K::AddrInUse
        | K::AddrNotAvailable
        | K::BrokenPipe => ErrorCode::NetworkError,
        _ => ErrorCode::Unknown,
    }
}

#[cfg(target_os = "linux")]
const fn code_from_errno(errno: i32) -> Option<ErrorCode> {
    Some(match errno {
        16 | 26 => ErrorCode::Busy, // EBUSY, ETXTBSY
        23 | 24 => ErrorCode::TooManyOpenFiles, // ENFILE, EMFILE
        36 => ErrorCode::NameTooLong,
        20 => ErrorCode::NotADirectory,
        21 => ErrorCode::IsADirectory,
        39 => ErrorCode::DirectoryNotEmpty,
        28 => ErrorCode::NoSpace,
        30 => ErrorCode::ReadOnlyFilesystem,
        18 => ErrorCode::CrossDevice,
        _ => return None,
    })
}

#[cfg(target_os = "macos")]
const fn code_from_errno(errno: i32) -> Option<ErrorCode> {
    Some(match errno {
        16 | 26 => ErrorCode::Busy,
        23 | 24 => ErrorCode::TooManyOpenFiles,
        63 => ErrorCode::NameTooLong,
        20 => ErrorCode::NotADirectory,
        21 => ErrorCode::IsADirectory,
        66 => ErrorCode::DirectoryNotEmpty,
        28 => ErrorCode::NoSpace,
        30 => ErrorCode::ReadOnlyFilesystem,
        18 => ErrorCode::CrossDevice,
        _ => return None,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const fn code_from_errno(_errno: i32) -> Option<ErrorCode> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_classify_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let op = classify_io(&err, "copy", Some(Path::new("/x")));
        assert_eq!(op.code, ErrorCode::NotFound);
        assert!(!op.recoverable);
        assert_eq!(op.operation, "copy");
        assert_eq!(op.path, Some(PathBuf::from("/x")));
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        let op = classify_io(&err, "remove", None);
        assert_eq!(op.code, ErrorCode::PermissionDenied);
        assert!(!op.recoverable);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_classify_errno_busy_and_handles() {
        let busy = classify_io(&io::Error::from_raw_os_error(16), "rename", None);
        assert_eq!(busy.code, ErrorCode::Busy);
        assert!(busy.recoverable);

        let handles = classify_io(&io::Error::from_raw_os_error(24), "open", None);
        assert_eq!(handles.code, ErrorCode::TooManyOpenFiles);
        assert!(handles.recoverable);

        let long = classify_io(&io::Error::from_raw_os_error(36), "open", None);
        assert_eq!(long.code, ErrorCode::NameTooLong);
        assert!(!long.recoverable);
    }

    #[test]
    fn test_classify_keeps_typed_error() {
        let typed = OpError::new(ErrorCode::Busy, "write", "locked").with_path("/a");
        let op = classify(&typed, "other", Some(Path::new("/b")));
        assert_eq!(op.code, ErrorCode::Busy);
        assert_eq!(op.operation, "write");
        assert_eq!(op.path, Some(PathBuf::from("/a")));
    }

    #[test]
    fn test_classify_typed_error_wrapped_in_io() {
        let typed = OpError::new(ErrorCode::BackupMissing, "restore", "missing");
        let wrapped = io::Error::new(io::ErrorKind::Other, typed);
        assert_eq!(classify_io(&wrapped, "x", None).code, ErrorCode::BackupMissing);
    }

    #[test]
    fn test_classify_unknown() {
        #[derive(Debug, thiserror::Error)]
        #[error("strange failure")]
        struct Strange;

        let op = classify(&Strange, "exec", None);
        assert_eq!(op.code, ErrorCode::Unknown);
        assert!(!op.recoverable);
        assert_eq!(op.message, "strange failure");
    }

    #[test]
    fn test_classify_walks_source_chain() {
        let err = anyhow::Error::new(io::Error::from(io::ErrorKind::TimedOut)).context("fetching");
        let op = classify(&*err, "fetch", None);
        assert_eq!(op.code, ErrorCode::Timeout);
        assert!(op.recoverable);
    }
}
