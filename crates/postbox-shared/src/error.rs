use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CursorError {
    #[error("Cursor is not valid base64url")]
    Base64Decode,

    #[error("Cursor payload is malformed")]
    InvalidFormat,

    #[error("Unsupported cursor version: {0}")]
    UnsupportedVersion(u8),

    #[error("Cursor timestamp out of range")]
    TimestampOutOfRange,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity must not be empty")]
    Empty,
}
