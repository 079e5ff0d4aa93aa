use std::fmt;
use std::process::ExitStatus;

pub const CODE_SUCCESS: u8 = 0;
pub const CODE_NOT_ZIP: u8 = 10;
pub const CODE_ENTRY_NOT_FOUND: u8 = 11;
pub const CODE_ARCHIVE_NOT_FOUND: u8 = 12;
pub const CODE_LIMITS_REACHED: u8 = 13;
pub const CODE_UNKNOWN_ERROR: u8 = 14;

/// Why an analysis run failed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    EntryNotFound,
    ArchiveNotFound,
    /// Any unrecognised exit code, death by signal, or a process that never
    /// started or was cut short.
    Unknown,
}

/// Result of one zip-metadata invocation, decoded once from its exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipOutcome {
    Success,
    /// Input is not a zip archive. Means "no metadata", not an error.
    NotArchive,
    /// Valid archive that violates entry or size policy.
    LimitsExceeded,
    Other(FailureKind),
}

impl ZipOutcome {
    /// `None` means the process was killed by a signal.
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ZipOutcome::Success,
            Some(c) if c == CODE_NOT_ZIP as i32 => ZipOutcome::NotArchive,
            Some(c) if c == CODE_ENTRY_NOT_FOUND as i32 => {
                ZipOutcome::Other(FailureKind::EntryNotFound)
            }
            Some(c) if c == CODE_ARCHIVE_NOT_FOUND as i32 => {
                ZipOutcome::Other(FailureKind::ArchiveNotFound)
            }
            Some(c) if c == CODE_LIMITS_REACHED as i32 => ZipOutcome::LimitsExceeded,
            _ => ZipOutcome::Other(FailureKind::Unknown),
        }
    }

    pub fn from_exit_status(status: ExitStatus) -> Self {
        Self::from_code(status.code())
    }

    /// Process exit code that encodes this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            ZipOutcome::Success => CODE_SUCCESS,
            ZipOutcome::NotArchive => CODE_NOT_ZIP,
            ZipOutcome::LimitsExceeded => CODE_LIMITS_REACHED,
            ZipOutcome::Other(FailureKind::EntryNotFound) => CODE_ENTRY_NOT_FOUND,
            ZipOutcome::Other(FailureKind::ArchiveNotFound) => CODE_ARCHIVE_NOT_FOUND,
            ZipOutcome::Other(FailureKind::Unknown) => CODE_UNKNOWN_ERROR,
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            ZipOutcome::Success => "success",
            ZipOutcome::NotArchive => "archive_invalid",
            ZipOutcome::LimitsExceeded => "limits_reached",
            ZipOutcome::Other(FailureKind::EntryNotFound) => "entry_not_found",
            ZipOutcome::Other(FailureKind::ArchiveNotFound) => "archive_not_found",
            ZipOutcome::Other(FailureKind::Unknown) => "unknown_error",
        }
    }
}

impl fmt::Display for ZipOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (exit code {})", self.label(), self.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_codes() {
        assert_eq!(ZipOutcome::from_code(Some(0)), ZipOutcome::Success);
        assert_eq!(ZipOutcome::from_code(Some(10)), ZipOutcome::NotArchive);
        assert_eq!(ZipOutcome::from_code(Some(13)), ZipOutcome::LimitsExceeded);
        assert_eq!(
            ZipOutcome::from_code(Some(11)),
            ZipOutcome::Other(FailureKind::EntryNotFound)
        );
        assert_eq!(
            ZipOutcome::from_code(Some(12)),
            ZipOutcome::Other(FailureKind::ArchiveNotFound)
        );
    }

    #[test]
    fn test_unrecognised_codes_and_signals_are_unknown() {
        for code in [Some(1), Some(14), Some(127), Some(-1), None] {
            assert_eq!(
                ZipOutcome::from_code(code),
                ZipOutcome::Other(FailureKind::Unknown)
            );
        }
    }

    #[test]
    fn test_exit_code_round_trip() {
        for outcome in [
            ZipOutcome::Success,
            ZipOutcome::NotArchive,
            ZipOutcome::LimitsExceeded,
            ZipOutcome::Other(FailureKind::EntryNotFound),
            ZipOutcome::Other(FailureKind::ArchiveNotFound),
            ZipOutcome::Other(FailureKind::Unknown),
        ] {
            assert_eq!(
                ZipOutcome::from_code(Some(outcome.exit_code() as i32)),
                outcome
            );
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(ZipOutcome::NotArchive.label(), "archive_invalid");
        assert_eq!(ZipOutcome::LimitsExceeded.label(), "limits_reached");
        assert_eq!(ZipOutcome::Other(FailureKind::Unknown).label(), "unknown_error");
    }
}
