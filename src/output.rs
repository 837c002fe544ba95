// Text renderings of decoded USN records.

use prettytable::{Table, row};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::usnjrn::UsnRecord;

pub const CSV_HEADER: &str = "timestamp,filename,fileattr,reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `timestamp | filename | attributes | reasons`
    #[default]
    Plain,
    Csv,
    /// Sleuthkit body file.
    Body,
    /// `time|source|host|user|description`
    Tln,
    /// Every field as pretty-printed JSON.
    Verbose,
    Table,
}

impl OutputFormat {
    /// Line written once before the first record, if any.
    pub fn header(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Csv => Some(CSV_HEADER),
            _ => None,
        }
    }

    /// Render `rec`, newline terminated. `system` is only used by TLN.
    pub fn render(&self, rec: &UsnRecord, system: &str) -> Result<String, serde_json::Error> {
        let out = match self {
            OutputFormat::Plain => format!(
                "{} | {} | {} | {}\n",
                human(rec),
                rec.filename,
                rec.attribute_flags.join(" "),
                rec.reason_flags.join(" ")
            ),
            OutputFormat::Csv => format!(
                "{},{},{},{}\n",
                human(rec),
                rec.filename,
                rec.attribute_flags.join(" "),
                rec.reason_flags.join(" ")
            ),
            OutputFormat::Body => body_line(rec),
            OutputFormat::Tln => format!(
                "{}|USN|{}||{};{}\n",
                rec.epoch_timestamp_ms,
                system,
                rec.filename,
                rec.reason_flags.join(" ")
            ),
            OutputFormat::Verbose => {
                let mut json = verbose_json(rec)?;
                json.push('\n');
                json
            }
            OutputFormat::Table => {
                let mut t = table(rec).to_string();
                if !t.ends_with('\n') {
                    t.push('\n');
                }
                t
            }
        };
        Ok(out)
    }
}

fn human(rec: &UsnRecord) -> &str {
    rec.human_timestamp.as_deref().unwrap_or("")
}

fn body_line(rec: &UsnRecord) -> String {
    let secs = rec.epoch_timestamp_ms / 1000;
    format!(
        "0|{} (USN: {})|{}-{}|0|0|0|0|{secs}|{secs}|{secs}|{secs}\n",
        rec.filename,
        rec.reason_flags.join(" "),
        rec.file_ref.entry_number,
        rec.file_ref.sequence_number
    )
}

/// Field order is part of the output format.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerboseRecord<'a> {
    filename: &'a str,
    human_timestamp: Option<&'a str>,
    timestamp: String,
    epoch_timestamp: i64,
    usn: u64,
    file_reference_number: u64,
    parent_file_reference_number: u64,
    reason: String,
    file_attributes: String,
    mft_seq_number: i16,
    mft_entry_number: u64,
    p_mft_seq_number: i16,
    p_mft_entry_number: u64,
    filename_length: u16,
    filename_offset: u16,
    source_info: u32,
    security_id: u32,
    major_version: u16,
    minor_version: u16,
}

impl<'a> From<&'a UsnRecord> for VerboseRecord<'a> {
    fn from(rec: &'a UsnRecord) -> Self {
        Self {
            filename: &rec.filename,
            human_timestamp: rec.human_timestamp.as_deref(),
            timestamp: format!("{:016x}", rec.timestamp),
            epoch_timestamp: rec.epoch_timestamp_ms,
            usn: rec.usn,
            file_reference_number: rec.file_reference_number,
            parent_file_reference_number: rec.parent_file_reference_number,
            reason: rec.reason_flags.join(" "),
            file_attributes: rec.attribute_flags.join(" "),
            mft_seq_number: rec.file_ref.sequence_number,
            mft_entry_number: rec.file_ref.entry_number,
            p_mft_seq_number: rec.parent_ref.sequence_number,
            p_mft_entry_number: rec.parent_ref.entry_number,
            filename_length: rec.filename_length,
            filename_offset: rec.filename_offset,
            source_info: rec.source_info,
            security_id: rec.security_id,
            major_version: rec.major_version,
            minor_version: rec.minor_version,
        }
    }
}

/// Pretty JSON with a four space indent.
pub fn verbose_json(rec: &UsnRecord) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    VerboseRecord::from(rec).serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn table(rec: &UsnRecord) -> Table {
    let mut t = Table::new();
    t.add_row(row![
        "USN Record Version",
        format!("{}.{}", rec.major_version, rec.minor_version)
    ]);
    t.add_row(row![b -> "Offset", format!("0x{:X}", rec.record_offset)]);
    t.add_row(row![b -> "USN", rec.usn]);
    t.add_row(row![b -> "Timestamp", human(rec)]);
    t.add_row(row![b -> "Timestamp (epoch ms)", rec.epoch_timestamp_ms]);
    t.add_row(row![b -> "Reason", format!("0x{:08X}", rec.reason)]);
    if !rec.reason_flags.is_empty() {
        t.add_row(row![b -> "Reason (decoded)", rec.reason_flags.join(" | ")]);
    }
    t.add_row(row![b -> "File Attrs", format!("0x{:08X}", rec.file_attributes)]);
    if !rec.attribute_flags.is_empty() {
        t.add_row(row![b -> "File Attrs (decoded)", rec.attribute_flags.join(" | ")]);
    }
    if !rec.source_info_flags.is_empty() {
        t.add_row(row![b -> "Source Info", rec.source_info_flags.join(" | ")]);
    }
    t.add_row(row![b -> "Security Id", rec.security_id]);
    t.add_row(row![b -> "File Ref", format!("{:#x}", rec.file_reference_number)]);
    t.add_row(row![b -> "Parent Ref", format!("{:#x}", rec.parent_file_reference_number)]);
    t.add_row(row![
        b -> "File MFT entry / seq",
        format!("{} / {}", rec.file_ref.entry_number, rec.file_ref.sequence_number)
    ]);
    t.add_row(row![
        b -> "Parent MFT entry / seq",
        format!("{} / {}", rec.parent_ref.entry_number, rec.parent_ref.sequence_number)
    ]);
    t.add_row(row![b -> "Name", rec.filename]);
    if rec.truncated {
        t.add_row(row![b -> "Truncated", "yes"]);
    }
    t
}
