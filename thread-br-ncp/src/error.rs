use core::fmt::{self, Display};

/// The error taxonomy shared by every public operation in the agent core.
///
/// A single hand-rolled enum, in the same spirit as `edge-mdns`'s `MdnsError`:
/// no `thiserror` derive, a manual `Display`, and `From` conversions added at
/// each boundary that needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// No error; used only where call sites need an explicit "nothing
    /// happened" result distinct from `Option::None`.
    None,
    InvalidArgs,
    InvalidState,
    Duplicated,
    NotFound,
    Timeout,
    Canceled,
    Aborted,
    Parse,
    NotImplemented,
    MulticastRouting,
    Dbus,
    Other,
    /// Process-ending fault: allocation failure, main-loop thrashing,
    /// or an unrecoverable NCP transport fault during init. The entry point
    /// converts this into a non-zero exit code rather than recovering.
    Fatal,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "no error",
            Self::InvalidArgs => "invalid arguments",
            Self::InvalidState => "invalid state",
            Self::Duplicated => "duplicated",
            Self::NotFound => "not found",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Parse => "parse error",
            Self::NotImplemented => "not implemented",
            Self::MulticastRouting => "multicast routing error",
            Self::Dbus => "dbus error",
            Self::Other => "other error",
            Self::Fatal => "fatal error",
        };

        write!(f, "{s}")
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                Self::InvalidArgs
            }
            std::io::ErrorKind::NotFound => Self::NotFound,
            _ => Self::Other,
        }
    }
}

/// Severity ranking used to order `Err` variants by how bad they are,
/// least to worst: `Ok < Duplicated < Other` per §4.6 step 4, with the rest
/// of the taxonomy slotted in between by how recoverable/specific they are.
fn severity(err: CoreError) -> u8 {
    match err {
        CoreError::None => 0,
        CoreError::Duplicated => 1,
        CoreError::Aborted => 2,
        CoreError::Timeout => 3,
        CoreError::Canceled => 4,
        CoreError::NotFound => 5,
        CoreError::InvalidArgs => 6,
        CoreError::InvalidState => 7,
        CoreError::Parse => 8,
        CoreError::NotImplemented => 9,
        CoreError::MulticastRouting => 10,
        CoreError::Dbus => 11,
        CoreError::Other => 12,
        CoreError::Fatal => 13,
    }
}

/// Orders the worst result seen across a batch of completions, as the
/// Advertising Proxy does when collapsing per-service publish outcomes into
/// one `advertising_done` call: `Ok` is best, everything else displaces it.
pub fn worse(a: Result<(), CoreError>, b: Result<(), CoreError>) -> Result<(), CoreError> {
    match (a, b) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(a), Err(b)) => {
            if severity(b) > severity(a) {
                Err(b)
            } else {
                Err(a)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worse_prefers_error_over_ok() {
        assert_eq!(worse(Ok(()), Err(CoreError::Duplicated)), Err(CoreError::Duplicated));
        assert_eq!(worse(Err(CoreError::Timeout), Ok(())), Err(CoreError::Timeout));
        assert_eq!(worse(Ok(()), Ok(())), Ok(()));
    }

    #[test]
    fn worse_ranks_error_severity_over_argument_order() {
        assert_eq!(worse(Err(CoreError::Other), Err(CoreError::Duplicated)), Err(CoreError::Other));
        assert_eq!(worse(Err(CoreError::Duplicated), Err(CoreError::Other)), Err(CoreError::Other));
        assert_eq!(worse(Err(CoreError::Duplicated), Err(CoreError::Duplicated)), Err(CoreError::Duplicated));
    }
}
