use clap::{Arg, ArgAction, ArgGroup, Command, value_parser};
use clap_num::maybe_hex;
use exhume_usnjrnl::UsnJournal;
use exhume_usnjrnl::output::OutputFormat;
use log::{debug, error, info};
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let matches = Command::new("exhume_usnjrnl")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Decode the records of an extracted NTFS $UsnJrnl:$J stream.")
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .action(ArgAction::Version)
                .help("Print version."),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The $UsnJrnl:$J stream to parse."),
        )
        .arg(
            Arg::new("outfile")
                .short('o')
                .long("outfile")
                .value_parser(value_parser!(String))
                .help("Write records to this file instead of stdout."),
        )
        .arg(
            Arg::new("offset")
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("Journal data starts at this byte offset in the file (decimal or hex)."),
        )
        .arg(
            Arg::new("csv")
                .short('c')
                .long("csv")
                .action(ArgAction::SetTrue)
                .help("Return USN records in comma-separated format."),
        )
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .action(ArgAction::SetTrue)
                .help("Return USN records in body file format."),
        )
        .arg(
            Arg::new("tln")
                .short('t')
                .long("tln")
                .action(ArgAction::SetTrue)
                .help("Return USN records in TLN format (use with -s to add a hostname)."),
        )
        .arg(
            Arg::new("verbose")
                .short('V')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Return every USN property of each record as JSON."),
        )
        .arg(
            Arg::new("table")
                .long("table")
                .action(ArgAction::SetTrue)
                .help("Return each USN record as a table."),
        )
        .group(
            ArgGroup::new("output_format")
                .args(["csv", "body", "tln", "verbose", "table"])
                .multiple(false),
        )
        .arg(
            Arg::new("system")
                .short('s')
                .long("system")
                .value_parser(value_parser!(String))
                .help("System hostname (used with --tln)."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let log_level_str = matches
        .get_one::<String>("log_level")
        .map(String::as_str)
        .unwrap_or("info");
    let level_filter = match log_level_str {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let format = if matches.get_flag("csv") {
        OutputFormat::Csv
    } else if matches.get_flag("body") {
        OutputFormat::Body
    } else if matches.get_flag("tln") {
        OutputFormat::Tln
    } else if matches.get_flag("verbose") {
        OutputFormat::Verbose
    } else if matches.get_flag("table") {
        OutputFormat::Table
    } else {
        OutputFormat::Plain
    };
    let system = matches
        .get_one::<String>("system")
        .cloned()
        .unwrap_or_default();
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);

    // `file` is required, clap has already rejected a missing one.
    let Some(file_path) = matches.get_one::<String>("file") else {
        return ExitCode::FAILURE;
    };

    let file = match File::open(file_path) {
        Ok(f) => f,
        Err(e) => {
            error!("Could not open '{}': {}", file_path, e);
            return ExitCode::FAILURE;
        }
    };
    let journal_len = match file.metadata() {
        Ok(m) => m.len(),
        Err(e) => {
            error!("Could not stat '{}': {}", file_path, e);
            return ExitCode::FAILURE;
        }
    };
    debug!("Opened '{}' ({} bytes).", file_path, journal_len);

    let out: Box<dyn Write> = match matches.get_one::<String>("outfile") {
        Some(path) => match File::create(path) {
            Ok(f) => Box::new(BufWriter::new(f)),
            Err(e) => {
                error!("Could not create '{}': {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut journal = UsnJournal::new(BufReader::new(file), journal_len);
    match dump_records(&mut journal, offset, format, &system, out) {
        Ok(count) => {
            info!("Wrote {} records.", count);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to parse the journal: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn dump_records<T: Read + Seek>(
    journal: &mut UsnJournal<T>,
    offset: u64,
    format: OutputFormat,
    system: &str,
    mut out: Box<dyn Write>,
) -> Result<u64, Box<dyn Error>> {
    journal.body.seek(SeekFrom::Start(offset))?;

    if let Some(header) = format.header() {
        writeln!(out, "{}", header)?;
    }
    let mut count = 0u64;
    for record in journal.records() {
        let record = record?;
        out.write_all(format.render(&record, system)?.as_bytes())?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}
