/// RO and RW flash sections of the base EC.
mod section;
pub use section::*;

/// Flash map (FMAP) parsing for EC images.
pub mod fmap;

/// The firmware image supplied for an update, split into its RO and RW sections.
mod image;
pub use image::*;

/// Outcome of a single update attempt.
mod status;
pub use status::*;

/// Firmware update capability: opening a session and talking to the base over it.
mod session;
pub use session::*;

/// Pairing capability and the challenge/response coordinator that injects the pairing key.
pub mod pair;
pub use pair::{PairManager, Paired};

/// Run loop and per-attempt state machine.
mod updater;
pub use updater::*;

/// In-memory base used for dry runs and tests.
pub mod mock;

/// Coarse classification of an [`Error`], used to pick the attempt outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The USB link went away or timed out. Reconnecting may help.
    Transport,
    /// The supplied image is corrupt or does not belong to this base.
    InvalidImage,
    /// The base answered something that breaks the update protocol.
    Protocol,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("usb transmission failed")]
    Transmission,
    #[error("usb operation timed out")]
    Timeout,
    #[error("no matching base attached")]
    NotFound,
    #[error("invalid firmware image: {0}")]
    Image(&'static str),
    #[error("image does not match this base")]
    Incompatible,
    #[error("operation not allowed while running {0}")]
    WrongSection(Section),
    #[error("base rejected pairing challenge with status {0:#04x}")]
    PairingRejected(u8),
    #[error("pairing response does not answer the challenge")]
    PairingMismatch,
    #[error("malformed response from base")]
    Malformed,
    #[error("flash write failed")]
    Write,
    #[error("{0} checksum mismatch after write")]
    Verify(Section),
    #[error("a session to the base is already open")]
    Busy,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transmission | Error::Timeout | Error::NotFound => ErrorKind::Transport,
            Error::Image(_) | Error::Incompatible => ErrorKind::InvalidImage,
            Error::WrongSection(_)
            | Error::PairingRejected(_)
            | Error::PairingMismatch
            | Error::Malformed
            | Error::Write
            | Error::Verify(_)
            | Error::Busy => ErrorKind::Protocol,
        }
    }
}

impl From<scroll::Error> for Error {
    fn from(_err: scroll::Error) -> Self {
        Error::Image("truncated flash map")
    }
}

impl From<core::str::Utf8Error> for Error {
    fn from(_err: core::str::Utf8Error) -> Self {
        Error::Image("string is not utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_errors() {
        assert_eq!(Error::Timeout.kind(), ErrorKind::Transport);
        assert_eq!(Error::NotFound.kind(), ErrorKind::Transport);
        assert_eq!(Error::Incompatible.kind(), ErrorKind::InvalidImage);
        assert_eq!(Error::Image("x").kind(), ErrorKind::InvalidImage);
        assert_eq!(Error::Verify(Section::Rw).kind(), ErrorKind::Protocol);
        assert_eq!(Error::PairingMismatch.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn display_names_section() {
        assert_eq!(
            Error::WrongSection(Section::Ro).to_string(),
            "operation not allowed while running RO"
        );
    }
}
