use crate::ErrorKind;

/// Result of one session with the base. The run loop decides what to do next
/// purely from this value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Base runs the target firmware and holds a valid pairing key.
    NoUpdate,
    /// Unrecoverable, e.g. a failed flash write or a protocol violation.
    FatalError,
    /// A section was written; the base must be reset before continuing.
    NeedReset,
    /// RO is up to date and execution is moving to RW.
    NeedJump,
    /// RW is up to date but has no valid pairing key.
    NeedInjectEntropy,
    /// The USB link dropped before the attempt concluded.
    LostConnection,
    /// The image is corrupt or not meant for this base.
    InvalidFirmware,
}

impl From<ErrorKind> for RunStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Transport => RunStatus::LostConnection,
            ErrorKind::InvalidImage => RunStatus::InvalidFirmware,
            ErrorKind::Protocol => RunStatus::FatalError,
        }
    }
}
