use thiserror::Error;

/// Failures raised while walking a `$J` stream.
///
/// Reaching the end of the journal is not one of them, see `scanner::Scan`.
#[derive(Error, Debug)]
pub enum UsnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zero record length at offset 0x{offset:X}")]
    ZeroRecordLength { offset: u64 },

    #[error("record at offset 0x{offset:X} claims {length} bytes, less than the fixed header")]
    RecordTooShort { offset: u64, length: u32 },

    #[error("stream position 0x{position:X} is past the journal end 0x{journal_len:X}")]
    PositionPastEnd { position: u64, journal_len: u64 },
}

pub type Result<T> = std::result::Result<T, UsnError>;
