// Sources:
// - https://learn.microsoft.com/windows/win32/api/winioctl/ns-winioctl-usn_record_v2
// - https://learn.microsoft.com/windows/win32/fileio/change-journals

use std::io::{Read, Seek, SeekFrom};
use std::iter::FusedIterator;

use log::{debug, info};
use scanner::{Scan, locate_first_record, locate_next_record};

pub mod error;
pub mod flags;
pub mod output;
pub mod scanner;
pub mod usnjrn;

pub use error::{Result, UsnError};
pub use usnjrn::{FileReference, UsnRecord, UsnRecordHeader, decode_record};

/// An extracted `$UsnJrnl:$J` stream.
///
/// `journal_len` is the absolute stream offset at which journal data ends.
#[derive(Debug)]
pub struct UsnJournal<T: Read + Seek> {
    pub body: T,
    journal_len: u64,
}

impl<T: Read + Seek> UsnJournal<T> {
    pub fn new(body: T, journal_len: u64) -> Self {
        Self { body, journal_len }
    }

    /// Use the whole stream, its length taken from a seek to the end.
    /// The body is left at offset 0.
    pub fn from_body(mut body: T) -> Result<Self> {
        let journal_len = body.seek(SeekFrom::End(0))?;
        body.seek(SeekFrom::Start(0))?;
        debug!("Journal stream is {} bytes.", journal_len);
        Ok(Self::new(body, journal_len))
    }

    pub fn journal_len(&self) -> u64 {
        self.journal_len
    }

    /// Lazily decode every record from the body's current position on.
    ///
    /// The iterator borrows the body and moves its cursor. It cannot be
    /// restarted; reposition the body and call `records` again instead.
    pub fn records(&mut self) -> Records<'_, T> {
        Records {
            body: &mut self.body,
            journal_len: self.journal_len,
            phase: Phase::Unstarted,
            decoded: 0,
        }
    }

    pub fn into_inner(self) -> T {
        self.body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unstarted,
    Running,
    Finished,
}

/// Forward-only iterator over the decoded records of a journal.
///
/// Ends with `None` at end of journal. After an `Err` it is exhausted.
pub struct Records<'a, T: Read + Seek> {
    body: &'a mut T,
    journal_len: u64,
    phase: Phase,
    decoded: u64,
}

impl<T: Read + Seek> Records<'_, T> {
    /// Records yielded so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    fn finish(&mut self) {
        if self.phase != Phase::Finished {
            info!("Decoded {} USN records.", self.decoded);
        }
        self.phase = Phase::Finished;
    }

    fn step(&mut self) -> Result<Option<UsnRecord>> {
        if self.phase == Phase::Unstarted {
            match locate_first_record(&mut *self.body)? {
                Scan::Found(offset) if offset < self.journal_len => {}
                _ => return Ok(None),
            }
            self.phase = Phase::Running;
        }

        let next = match locate_next_record(&mut *self.body, self.journal_len)? {
            Scan::Found(next) => next,
            Scan::EndOfJournal => return Ok(None),
        };
        let record = decode_record(&mut *self.body)?;
        self.decoded += 1;

        if next >= self.journal_len {
            if next > self.journal_len {
                debug!(
                    "Record at 0x{:X} runs past the journal end (0x{:X} > 0x{:X}).",
                    record.record_offset, next, self.journal_len
                );
            }
            self.finish();
        } else {
            self.body.seek(SeekFrom::Start(next))?;
        }
        Ok(Some(record))
    }
}

impl<T: Read + Seek> Iterator for Records<'_, T> {
    type Item = Result<UsnRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.phase == Phase::Finished {
            return None;
        }
        match self.step() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl<T: Read + Seek> FusedIterator for Records<'_, T> {}
