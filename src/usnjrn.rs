// Sources:
// - https://learn.microsoft.com/windows/win32/api/winioctl/ns-winioctl-usn_record_v2
// - https://learn.microsoft.com/windows/win32/sysinfo/file-times
//
// $UsnJrnl:$J record decoder (USN_RECORD_V2 layout).

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{Datelike, TimeZone, Timelike, Utc};
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read, Seek};

use crate::error::{Result, UsnError};
use crate::flags::{decode_file_attributes, decode_source_info, decode_usn_reasons};

/// RecordLength (4) + fixed body (56).
pub const USN_RECORD_HEADER_SIZE: usize = 60;

const FILE_REFERENCE_ENTRY_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;
const FILETIME_TICKS_PER_MILLI: u64 = 10_000;
const EPOCH_DELTA_SECS: i64 = 11_644_473_600;
const EPOCH_DELTA_MILLIS: i64 = 11_644_473_600_000;

/// Fixed part of a USN_RECORD_V2, as laid out on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UsnRecordHeader {
    pub record_len: u32,            // 0x00
    pub major_version: u16,         // 0x04
    pub minor_version: u16,         // 0x06
    pub file_reference_number: u64, // 0x08
    pub parent_file_reference_number: u64, // 0x10
    pub usn: u64,                   // 0x18
    pub timestamp: u64,             // 0x20 FILETIME (UTC)
    pub reason: u32,                // 0x28
    pub source_info: u32,           // 0x2C
    pub security_id: u32,           // 0x30
    pub file_attributes: u32,       // 0x34
    pub filename_length: u16,       // 0x38 bytes
    pub filename_offset: u16,       // 0x3A
}

impl UsnRecordHeader {
    /// Parse the first 60 bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < USN_RECORD_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "USN record header must be 60 bytes",
            ));
        }
        let mut c = Cursor::new(buf);
        Ok(Self {
            record_len: c.read_u32::<LittleEndian>()?,
            major_version: c.read_u16::<LittleEndian>()?,
            minor_version: c.read_u16::<LittleEndian>()?,
            file_reference_number: c.read_u64::<LittleEndian>()?,
            parent_file_reference_number: c.read_u64::<LittleEndian>()?,
            usn: c.read_u64::<LittleEndian>()?,
            timestamp: c.read_u64::<LittleEndian>()?,
            reason: c.read_u32::<LittleEndian>()?,
            source_info: c.read_u32::<LittleEndian>()?,
            security_id: c.read_u32::<LittleEndian>()?,
            file_attributes: c.read_u32::<LittleEndian>()?,
            filename_length: c.read_u16::<LittleEndian>()?,
            filename_offset: c.read_u16::<LittleEndian>()?,
        })
    }
}

/// An MFT file reference split into its entry index and reuse sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileReference {
    /// Low 48 bits.
    pub entry_number: u64,
    /// High 16 bits, read as signed.
    pub sequence_number: i16,
}

impl FileReference {
    pub fn from_u64(raw: u64) -> Self {
        Self {
            entry_number: raw & FILE_REFERENCE_ENTRY_MASK,
            sequence_number: (raw >> 48) as u16 as i16,
        }
    }

    pub fn to_u64(self) -> u64 {
        ((self.sequence_number as u16 as u64) << 48) | self.entry_number
    }
}

/// FILETIME rendered as `YYYY-MM-DD HH:MM:SS[.ffffff]` (UTC).
///
/// Returns `None` outside years 1..=9999.
pub fn filetime_to_human(ft: u64) -> Option<String> {
    let secs = (ft / FILETIME_TICKS_PER_SECOND) as i64 - EPOCH_DELTA_SECS;
    let nanos = ((ft % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    let dt = Utc.timestamp_opt(secs, nanos).single()?;
    if !(1..=9999).contains(&dt.year()) {
        return None;
    }
    let micros = dt.nanosecond() / 1_000;
    let mut out = dt.format("%Y-%m-%d %H:%M:%S").to_string();
    if micros != 0 {
        out.push_str(&format!(".{micros:06}"));
    }
    Some(out)
}

/// Milliseconds since 1970-01-01 UTC, negative before it.
pub fn filetime_to_epoch_ms(ft: u64) -> i64 {
    (ft / FILETIME_TICKS_PER_MILLI) as i64 - EPOCH_DELTA_MILLIS
}

/// Decode UTF-16LE. Unpaired surrogates become `\uXXXX` text so that the
/// name survives any output encoding.
pub fn utf16le_to_string(raw: &[u8]) -> String {
    let units = raw
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]));
    let mut out = String::with_capacity(raw.len() / 2);
    for decoded in char::decode_utf16(units) {
        match decoded {
            Ok(ch) => out.push(ch),
            Err(e) => out.push_str(&format!("\\u{:04x}", e.unpaired_surrogate())),
        }
    }
    out
}

/// A fully decoded USN record.
#[derive(Debug, Clone, Serialize)]
pub struct UsnRecord {
    /// Absolute offset of the record inside the journal stream.
    pub record_offset: u64,
    pub record_len: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub file_ref: FileReference,
    pub parent_ref: FileReference,
    pub usn: u64,
    pub timestamp: u64,
    pub human_timestamp: Option<String>,
    pub epoch_timestamp_ms: i64,
    pub reason: u32,
    pub reason_flags: Vec<&'static str>,
    pub source_info: u32,
    pub source_info_flags: Vec<&'static str>,
    pub security_id: u32,
    pub file_attributes: u32,
    pub attribute_flags: Vec<&'static str>,
    pub filename_length: u16,
    pub filename_offset: u16,
    /// Component name only. Empty when the name bytes were cut short.
    pub filename: String,
    /// Set when the header or the name ran past the end of the stream.
    pub truncated: bool,
}

impl UsnRecord {
    pub fn from_header(
        record_offset: u64,
        header: &UsnRecordHeader,
        filename: String,
        truncated: bool,
    ) -> Self {
        Self {
            record_offset,
            record_len: header.record_len,
            major_version: header.major_version,
            minor_version: header.minor_version,
            file_reference_number: header.file_reference_number,
            parent_file_reference_number: header.parent_file_reference_number,
            file_ref: FileReference::from_u64(header.file_reference_number),
            parent_ref: FileReference::from_u64(header.parent_file_reference_number),
            usn: header.usn,
            timestamp: header.timestamp,
            human_timestamp: filetime_to_human(header.timestamp),
            epoch_timestamp_ms: filetime_to_epoch_ms(header.timestamp),
            reason: header.reason,
            reason_flags: decode_usn_reasons(header.reason),
            source_info: header.source_info,
            source_info_flags: decode_source_info(header.source_info),
            security_id: header.security_id,
            file_attributes: header.file_attributes,
            attribute_flags: decode_file_attributes(header.file_attributes),
            filename_length: header.filename_length,
            filename_offset: header.filename_offset,
            filename,
            truncated,
        }
    }
}

/// Decode the record that starts at the current stream position.
///
/// Consumes the 60-byte header and then `filename_length` bytes, so the
/// cursor ends at `start + 60 + filename_length` (or at end of stream when
/// the record is cut short). The name is read right after the header;
/// `filename_offset` is reported but not followed. Seeking to the next
/// record is the caller's job.
pub fn decode_record<R: Read + Seek>(stream: &mut R) -> Result<UsnRecord> {
    let record_offset = stream.stream_position()?;
    let mut truncated = false;

    let mut raw = Vec::with_capacity(USN_RECORD_HEADER_SIZE);
    stream
        .by_ref()
        .take(USN_RECORD_HEADER_SIZE as u64)
        .read_to_end(&mut raw)?;
    if raw.len() < USN_RECORD_HEADER_SIZE {
        warn!(
            "USN record at 0x{:X}: header cut short ({} of {} bytes), zero-filling.",
            record_offset,
            raw.len(),
            USN_RECORD_HEADER_SIZE
        );
        truncated = true;
        raw.resize(USN_RECORD_HEADER_SIZE, 0);
    }
    let header = UsnRecordHeader::from_bytes(&raw)?;

    if header.record_len == 0 {
        return Err(UsnError::ZeroRecordLength {
            offset: record_offset,
        });
    }
    if (header.record_len as usize) < USN_RECORD_HEADER_SIZE {
        return Err(UsnError::RecordTooShort {
            offset: record_offset,
            length: header.record_len,
        });
    }
    if header.major_version != 2 {
        warn!(
            "USN record at 0x{:X} has version {}.{}, decoding with the V2 layout.",
            record_offset, header.major_version, header.minor_version
        );
    }

    let name_len = header.filename_length as usize;
    let mut name_raw = Vec::with_capacity(name_len);
    stream
        .by_ref()
        .take(name_len as u64)
        .read_to_end(&mut name_raw)?;
    let filename = if name_raw.len() < name_len {
        warn!(
            "USN record at 0x{:X}: file name cut short ({} of {} bytes).",
            record_offset,
            name_raw.len(),
            name_len
        );
        truncated = true;
        String::new()
    } else {
        utf16le_to_string(&name_raw)
    };

    let record = UsnRecord::from_header(record_offset, &header, filename, truncated);
    trace!(
        "USN record at 0x{:X}: usn={} name={:?}",
        record_offset, record.usn, record.filename
    );
    Ok(record)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 2020-01-01T00:00:00Z
    pub const FT_2020: u64 = 132_223_104_000_000_000;

    pub fn utf16(name: &str) -> Vec<u8> {
        name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    /// Serialise a V2 record. `record_len` of `None` means header + name.
    pub fn build_record(
        record_len: Option<u32>,
        reason: u32,
        attrs: u32,
        timestamp: u64,
        name: &[u8],
    ) -> Vec<u8> {
        let len = record_len.unwrap_or((USN_RECORD_HEADER_SIZE + name.len()) as u32);
        let mut b = Vec::new();
        b.extend_from_slice(&len.to_le_bytes());
        b.extend_from_slice(&2u16.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(&0x0005_0000_0000_1234u64.to_le_bytes());
        b.extend_from_slice(&0x0001_0000_0000_0005u64.to_le_bytes());
        b.extend_from_slice(&4096u64.to_le_bytes());
        b.extend_from_slice(&timestamp.to_le_bytes());
        b.extend_from_slice(&reason.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&0x101u32.to_le_bytes());
        b.extend_from_slice(&attrs.to_le_bytes());
        b.extend_from_slice(&(name.len() as u16).to_le_bytes());
        b.extend_from_slice(&60u16.to_le_bytes());
        b.extend_from_slice(name);
        b
    }

    #[test]
    fn file_reference_split() {
        let r = FileReference::from_u64(0x0005_0000_0000_1234);
        assert_eq!(r.entry_number, 0x1234);
        assert_eq!(r.sequence_number, 5);

        let r = FileReference::from_u64(0xFFFF_0102_0304_0506);
        assert_eq!(r.entry_number, 0x0102_0304_0506);
        assert_eq!(r.sequence_number, -1);
    }

    #[test]
    fn file_reference_reassembles() {
        for v in [
            0u64,
            1,
            0x0000_FFFF_FFFF_FFFF,
            0x8000_0000_0000_0000,
            0x7FFF_1234_5678_9ABC,
            u64::MAX,
        ] {
            assert_eq!(FileReference::from_u64(v).to_u64(), v);
        }
    }

    #[test]
    fn epoch_ms() {
        assert_eq!(filetime_to_epoch_ms(FT_2020), 1_577_836_800_000);
        assert_eq!(filetime_to_epoch_ms(0), -11_644_473_600_000);
        // sub-millisecond ticks are floored
        assert_eq!(filetime_to_epoch_ms(FT_2020 + 9_999), 1_577_836_800_000);
        assert_eq!(filetime_to_epoch_ms(FT_2020 + 10_000), 1_577_836_800_001);
    }

    #[test]
    fn epoch_ms_is_monotonic() {
        let samples = [0u64, 1, 9_999, 10_000, FT_2020 - 1, FT_2020, FT_2020 + 1];
        for w in samples.windows(2) {
            assert!(filetime_to_epoch_ms(w[0]) <= filetime_to_epoch_ms(w[1]));
        }
    }

    #[test]
    fn human_timestamp() {
        assert_eq!(
            filetime_to_human(FT_2020).as_deref(),
            Some("2020-01-01 00:00:00")
        );
        assert_eq!(
            filetime_to_human(FT_2020 + 1_234_567).as_deref(),
            Some("2020-01-01 00:00:00.123456")
        );
        assert_eq!(filetime_to_human(0).as_deref(), Some("1601-01-01 00:00:00"));
    }

    #[test]
    fn human_timestamp_out_of_range() {
        assert_eq!(filetime_to_human(u64::MAX), None);
        // the epoch value is still produced
        assert_eq!(filetime_to_epoch_ms(u64::MAX), 1_844_674_407_370_955 - 11_644_473_600_000);
    }

    #[test]
    fn unpaired_surrogate_is_escaped() {
        let mut raw = utf16("a");
        raw.extend_from_slice(&0xD800u16.to_le_bytes());
        raw.extend_from_slice(&utf16("b"));
        assert_eq!(utf16le_to_string(&raw), "a\\ud800b");
        assert_eq!(utf16le_to_string(&utf16("résumé.txt")), "résumé.txt");
    }

    #[test]
    fn decodes_a_record() {
        let mut stream = Cursor::new(build_record(None, 0x100, 0x20, FT_2020, &utf16("a.txt")));
        let rec = decode_record(&mut stream).unwrap();

        assert_eq!(rec.filename, "a.txt");
        assert_eq!(rec.filename_length, 10);
        assert_eq!(rec.reason_flags, vec!["FILE_CREATE"]);
        assert_eq!(rec.attribute_flags, vec!["ARCHIVE"]);
        assert_eq!(rec.human_timestamp.as_deref(), Some("2020-01-01 00:00:00"));
        assert_eq!(rec.epoch_timestamp_ms, 1_577_836_800_000);
        assert_eq!(rec.file_ref.entry_number, 0x1234);
        assert_eq!(rec.file_ref.sequence_number, 5);
        assert_eq!(rec.parent_ref.entry_number, 5);
        assert_eq!(rec.parent_ref.sequence_number, 1);
        assert_eq!(rec.usn, 4096);
        assert_eq!(rec.security_id, 0x101);
        assert!(!rec.truncated);
        assert_eq!(stream.position(), 70);
    }

    #[test]
    fn name_length_bounds_the_read() {
        // only the first 8 bytes of the name belong to the record
        let mut bytes = build_record(Some(72), 0x100, 0x20, FT_2020, &utf16("a.tx"));
        bytes.extend_from_slice(&utf16("t"));
        let mut stream = Cursor::new(bytes);
        let rec = decode_record(&mut stream).unwrap();
        assert_eq!(rec.filename, "a.tx");
        assert_eq!(stream.position(), 68);
    }

    #[test]
    fn short_name_is_reported_empty() {
        let mut bytes = build_record(Some(80), 0x100, 0x20, FT_2020, &[]);
        // claim 20 name bytes, provide 6
        bytes[0x38..0x3A].copy_from_slice(&20u16.to_le_bytes());
        bytes.extend_from_slice(&utf16("abc"));
        let mut stream = Cursor::new(bytes);
        let rec = decode_record(&mut stream).unwrap();
        assert_eq!(rec.filename, "");
        assert!(rec.truncated);
        assert_eq!(rec.reason_flags, vec!["FILE_CREATE"]);
    }

    #[test]
    fn short_header_is_zero_filled() {
        let bytes = build_record(None, 0x100, 0x20, FT_2020, &[]);
        let mut stream = Cursor::new(bytes[..0x2C].to_vec());
        let rec = decode_record(&mut stream).unwrap();
        assert!(rec.truncated);
        assert_eq!(rec.reason, 0x100);
        assert_eq!(rec.file_attributes, 0);
        assert_eq!(rec.filename, "");
    }

    #[test]
    fn zero_length_is_an_error() {
        let mut stream = Cursor::new(vec![0u8; 64]);
        assert!(matches!(
            decode_record(&mut stream),
            Err(UsnError::ZeroRecordLength { offset: 0 })
        ));
    }

    #[test]
    fn length_below_header_is_an_error() {
        let bytes = build_record(Some(24), 0, 0, FT_2020, &[]);
        let mut stream = Cursor::new(bytes);
        assert!(matches!(
            decode_record(&mut stream),
            Err(UsnError::RecordTooShort { length: 24, .. })
        ));
    }
}
