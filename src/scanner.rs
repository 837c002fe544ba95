// Record boundary discovery inside a sparse, zero-padded $J stream.
//
// Known limitation: a byte or length field of zero is always taken for
// padding. A record whose leading bytes are zero cannot be told apart from
// the gap in front of it.

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{Result, UsnError};

/// Read size used while skipping leading padding.
pub const SCAN_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a boundary search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Found(u64),
    EndOfJournal,
}

/// Skip the zero run at the current position.
///
/// On `Found(offset)` the stream is left at `offset`, the first non-zero
/// byte. Chunks that are entirely zero are skipped, only a read returning
/// nothing ends the search.
pub fn locate_first_record<R: Read + Seek>(stream: &mut R) -> Result<Scan> {
    let start = stream.stream_position()?;
    let mut chunk = vec![0u8; SCAN_CHUNK_SIZE];
    let mut chunk_start = start;

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => {
                debug!("Reached end of stream at 0x{:X} without a record.", chunk_start);
                return Ok(Scan::EndOfJournal);
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if let Some(idx) = chunk[..n].iter().position(|&b| b != 0) {
            let offset = chunk_start + idx as u64;
            stream.seek(SeekFrom::Start(offset))?;
            debug!(
                "First USN record at 0x{:X} ({} padding bytes skipped).",
                offset,
                offset - start
            );
            return Ok(Scan::Found(offset));
        }
        chunk_start += n as u64;
    }
}

/// Find the next record from the current position.
///
/// Zero length words are padding and are stepped over four bytes at a
/// time. When a non-zero length is read the stream is rewound onto it and
/// `Found(record_start + length)`, the offset of the record after it, is
/// returned. Reaching `journal_len` yields `EndOfJournal`, nothing at or
/// past `journal_len` is read.
pub fn locate_next_record<R: Read + Seek>(stream: &mut R, journal_len: u64) -> Result<Scan> {
    let start = stream.stream_position()?;
    if start > journal_len {
        return Err(UsnError::PositionPastEnd {
            position: start,
            journal_len,
        });
    }

    let mut pos = start;
    while pos + 4 <= journal_len {
        let record_len = match stream.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if record_len != 0 {
            stream.seek(SeekFrom::Start(pos))?;
            if pos != start {
                debug!("Skipped {} padding bytes before 0x{:X}.", pos - start, pos);
            }
            return Ok(Scan::Found(pos + record_len as u64));
        }
        pos += 4;
    }

    debug!("End of journal at 0x{:X}.", pos);
    Ok(Scan::EndOfJournal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn with_header_after(padding: usize) -> Vec<u8> {
        let mut b = vec![0u8; padding];
        b.extend_from_slice(&60u32.to_le_bytes());
        b.extend_from_slice(&[0xAA; 56]);
        b.extend_from_slice(&[0x61, 0x00]);
        b
    }

    #[test]
    fn first_record_after_padding() {
        let mut stream = Cursor::new(with_header_after(24));
        assert_eq!(locate_first_record(&mut stream).unwrap(), Scan::Found(24));
        assert_eq!(stream.position(), 24);
    }

    #[test]
    fn first_record_at_start() {
        let mut stream = Cursor::new(with_header_after(0));
        assert_eq!(locate_first_record(&mut stream).unwrap(), Scan::Found(0));
    }

    #[test]
    fn first_record_across_zero_chunks() {
        let padding = SCAN_CHUNK_SIZE * 2 + 100;
        let mut stream = Cursor::new(with_header_after(padding));
        assert_eq!(
            locate_first_record(&mut stream).unwrap(),
            Scan::Found(padding as u64)
        );
    }

    #[test]
    fn first_record_is_relative_to_the_current_position() {
        let mut stream = Cursor::new(with_header_after(40));
        stream.set_position(8);
        assert_eq!(locate_first_record(&mut stream).unwrap(), Scan::Found(40));
    }

    #[test]
    fn zero_stream_has_no_first_record() {
        let mut stream = Cursor::new(vec![0u8; SCAN_CHUNK_SIZE + 7]);
        assert_eq!(locate_first_record(&mut stream).unwrap(), Scan::EndOfJournal);
    }

    #[test]
    fn next_record_offset() {
        let mut stream = Cursor::new(with_header_after(0));
        assert_eq!(locate_next_record(&mut stream, 62).unwrap(), Scan::Found(60));
        // rewound onto the length word
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn next_record_skips_a_gap() {
        let mut bytes = with_header_after(0);
        bytes.truncate(60);
        bytes.extend_from_slice(&[0u8; 36]);
        bytes.extend_from_slice(&64u32.to_le_bytes());
        bytes.extend_from_slice(&[0x11; 60]);
        let len = bytes.len() as u64;
        let mut stream = Cursor::new(bytes);
        stream.set_position(60);
        assert_eq!(locate_next_record(&mut stream, len).unwrap(), Scan::Found(160));
        assert_eq!(stream.position(), 96);
    }

    #[test]
    fn zero_stream_ends_without_reading_past_it() {
        for len in [0usize, 3, 4, 64, 1021] {
            let mut stream = Cursor::new(vec![0u8; len]);
            assert_eq!(
                locate_next_record(&mut stream, len as u64).unwrap(),
                Scan::EndOfJournal
            );
            assert!(stream.position() <= len as u64);
        }
    }

    #[test]
    fn declared_length_bounds_the_search() {
        // data beyond the declared journal length is never looked at
        let bytes = with_header_after(32);
        let mut stream = Cursor::new(bytes);
        assert_eq!(locate_next_record(&mut stream, 32).unwrap(), Scan::EndOfJournal);
        assert_eq!(stream.position(), 32);
    }

    #[test]
    fn position_past_end_is_an_error() {
        let mut stream = Cursor::new(vec![0u8; 16]);
        stream.set_position(20);
        assert!(matches!(
            locate_next_record(&mut stream, 16),
            Err(UsnError::PositionPastEnd {
                position: 20,
                journal_len: 16
            })
        ));
    }
}
