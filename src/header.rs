//! ASCII preamble parsing.
//!
//! A TOB3 file opens with six comma-separated, quote-delimited ASCII
//! lines: two environment lines (station identity and frame geometry)
//! followed by four column lines (names, units, aggregation tags, and
//! dtype tags). Everything after those lines is the binary frame stream.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::layout::{RecordLayout, StorageType};
use crate::schema::{MetaValue, Metadata};
use crate::{Error, Result};

/// Logger file format, selected by the first preamble token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FileType {
    Tob3,
}

impl FileType {
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "TOB3" => Some(FileType::Tob3),
            _ => None,
        }
    }

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            FileType::Tob3 => "TOB3",
        }
    }
}

/// Schema for one declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub unit: String,
    /// Aggregation applied by the logger program, e.g. `Smp` or `Avg`.
    pub aggregation: String,
    pub storage: StorageType,
    /// True when the column does not decode to a numeric value and should
    /// be skipped by downstream normalization.
    pub ignore: bool,
}

impl ColumnDescriptor {
    /// The column's metadata as handed to the schema-normalization
    /// collaborator.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        Metadata::from([
            ("unit".to_string(), MetaValue::Text(self.unit.clone())),
            (
                "aggregation".to_string(),
                MetaValue::Text(self.aggregation.clone()),
            ),
            (
                "dtype".to_string(),
                MetaValue::Text(self.storage.tag().to_string()),
            ),
            ("ignore".to_string(), MetaValue::Flag(self.ignore)),
        ])
    }
}

/// Everything the preamble declares about the file, parsed once at open
/// and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub file_type: FileType,
    pub station_name: String,
    pub logger_model: String,
    pub serial_no: String,
    pub program: String,
    /// File creation timestamp, as written in the preamble.
    pub file_timestamp: String,
    pub table_name: String,
    /// Total frame size in bytes, header and footer included.
    pub frame_size: usize,
    /// Expected footer validation stamp.
    pub validation_stamp: u16,
    /// Seconds represented by one frame-header tick.
    pub frame_time: f64,
    /// Nominal sampling interval in seconds.
    pub interval: f64,
    pub columns: Vec<ColumnDescriptor>,
    /// Record width in bytes, derived from the column dtypes.
    pub record_size: usize,
    /// Whole records per frame body, derived from the frame geometry.
    pub records_per_frame: usize,
}

impl FileHeader {
    /// Parse the six preamble lines from `reader`, leaving it positioned
    /// at the first binary frame.
    ///
    /// # Errors
    /// [`Error::HeaderMismatch`] if the first token is not a supported
    /// file type tag, [`Error::UnsupportedDtype`] for unknown dtype tags,
    /// [`Error::FrameGeometry`] if the declared geometry cannot hold a
    /// record, or [`Error::Preamble`] for missing lines or fields. All are
    /// fatal: no partial header is ever produced.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        let env = read_line(reader, "environment")?;
        let tag = env.first().map(String::as_str).unwrap_or_default();
        let file_type =
            FileType::from_tag(tag).ok_or_else(|| Error::HeaderMismatch(tag.to_string()))?;
        if env.len() < 8 {
            return Err(Error::Preamble(format!(
                "environment line has {} fields, expected 8",
                env.len()
            )));
        }

        let table = read_line(reader, "table")?;
        if table.len() < 6 {
            return Err(Error::Preamble(format!(
                "table line has {} fields, expected 6",
                table.len()
            )));
        }
        let frame_size: usize = table[2]
            .parse()
            .map_err(|_| Error::Preamble(format!("bad frame size: {:?}", table[2])))?;
        let validation_stamp: u16 = table[4]
            .parse()
            .map_err(|_| Error::Preamble(format!("bad validation stamp: {:?}", table[4])))?;
        let interval = parse_interval(&table[1])?;
        let frame_time = parse_interval(&table[5])?;

        let names = read_line(reader, "column names")?;
        let units = read_line(reader, "units")?;
        let aggregations = read_line(reader, "aggregation tags")?;
        let dtypes = read_line(reader, "dtype tags")?;

        let mut columns = Vec::with_capacity(names.len());
        for (((name, unit), aggregation), dtype) in names
            .into_iter()
            .zip(units)
            .zip(aggregations)
            .zip(dtypes)
        {
            let storage = StorageType::from_tag(&dtype)?;
            columns.push(ColumnDescriptor {
                name,
                unit,
                aggregation,
                storage,
                ignore: !storage.is_numeric(),
            });
        }

        let layout = RecordLayout::compile(&columns);
        let records_per_frame = layout.records_per_frame(frame_size)?;

        let header = FileHeader {
            file_type,
            station_name: env[1].clone(),
            logger_model: env[2].clone(),
            serial_no: env[3].clone(),
            program: program_name(&env[5]),
            file_timestamp: env[env.len() - 1].clone(),
            table_name: table[0].clone(),
            frame_size,
            validation_stamp,
            frame_time,
            interval,
            columns,
            record_size: layout.record_size(),
            records_per_frame,
        };
        debug!(
            table = header.table_name,
            frame_size,
            records_per_frame,
            columns = header.columns.len(),
            "parsed header"
        );
        Ok(header)
    }

    /// The compiled record layout for this header's columns.
    #[must_use]
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::compile(&self.columns)
    }

    /// Per-column metadata keyed by original column name.
    #[must_use]
    pub fn variable_map(&self) -> std::collections::BTreeMap<String, Metadata> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.metadata()))
            .collect()
    }
}

fn read_line<R: BufRead>(reader: &mut R, what: &str) -> Result<Vec<String>> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Err(Error::Preamble(format!("missing {what} line")));
    }
    Ok(parse_line_from_bytes(&raw))
}

/// Split a raw preamble line into its unquoted comma-separated tokens.
#[must_use]
pub fn parse_line_from_bytes(line: &[u8]) -> Vec<String> {
    parse_line_from_text(&String::from_utf8_lossy(line))
}

/// Split an already-decoded preamble line into its unquoted
/// comma-separated tokens.
#[must_use]
pub fn parse_line_from_text(line: &str) -> Vec<String> {
    line.trim()
        .replace('"', "")
        .split(',')
        .map(str::to_string)
        .collect()
}

/// Parse an interval string such as `"100 Msec"` or `"1 SEC"` into
/// seconds. The leading digit run is isolated first, so prefixes like
/// `"Sec100 Usec"` resolve the way the logger writes them.
pub fn parse_interval(text: &str) -> Result<f64> {
    let start = text
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| Error::Frequency(text.to_string()))?;
    let s = &text[start..];
    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let value: f64 = s[..num_end]
        .parse()
        .map_err(|_| Error::Frequency(text.to_string()))?;
    let scale = match s[num_end..].trim().to_ascii_lowercase().as_str() {
        "usec" => 1e-6,
        "msec" => 1e-3,
        "sec" => 1.0,
        "min" => 60.0,
        "hr" => 3600.0,
        _ => return Err(Error::Frequency(text.to_string())),
    };
    Ok(value * scale)
}

/// The program field is written as `CPU:name.CR1X`; keep the part after
/// the storage-device prefix.
fn program_name(field: &str) -> String {
    field.rsplit(':').next().unwrap_or(field).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const PREAMBLE: &str = concat!(
        "\"TOB3\",\"BB\",\"CR1000X\",\"12342\",\"CR1000X.Std.03.02\",\"CPU:fluxnet.CR1X\",\"65324\",\"2023-06-01 00:00:00\"\n",
        "\"Flux\",\"100 MSEC\",\"64\",\"123456\",\"43981\",\"10 Usec\",\"0\"\n",
        "\"Ux\",\"Uy\",\"Ts\"\n",
        "\"m/s\",\"m/s\",\"C\"\n",
        "\"Smp\",\"Smp\",\"Smp\"\n",
        "\"IEEE4B\",\"FP2\",\"IEEE8B\"\n",
    );

    #[test]
    fn parses_full_preamble() {
        let mut r = PREAMBLE.as_bytes();
        let header = FileHeader::read(&mut r).unwrap();
        assert_eq!(header.file_type, FileType::Tob3);
        assert_eq!(header.station_name, "BB");
        assert_eq!(header.logger_model, "CR1000X");
        assert_eq!(header.serial_no, "12342");
        assert_eq!(header.program, "fluxnet.CR1X");
        assert_eq!(header.file_timestamp, "2023-06-01 00:00:00");
        assert_eq!(header.table_name, "Flux");
        assert_eq!(header.frame_size, 64);
        assert_eq!(header.validation_stamp, 43981);
        assert_eq!(header.interval, 0.1);
        assert_eq!(header.frame_time, 10.0 * 1e-6);
        assert_eq!(header.columns.len(), 3);
        assert_eq!(header.columns[1].name, "Uy");
        assert_eq!(header.columns[1].unit, "m/s");
        assert_eq!(header.columns[1].storage, StorageType::CompactFloat16);
        // 4 + 2 + 8 = 14 bytes, (64 - 16) / 14 = 3
        assert_eq!(header.record_size, 14);
        assert_eq!(header.records_per_frame, 3);
    }

    #[test]
    fn wrong_tag_is_header_mismatch() {
        let mut r = PREAMBLE.replace("TOB3", "TOA5");
        let err = FileHeader::read(&mut r.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::HeaderMismatch(tag) if tag == "TOA5"));
        r = "garbage\n".to_string();
        let err = FileHeader::read(&mut r.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::HeaderMismatch(_)));
    }

    #[test]
    fn unknown_dtype_is_fatal() {
        let r = PREAMBLE.replace("IEEE8B", "ASCII(4)");
        let err = FileHeader::read(&mut r.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDtype(_)));
    }

    #[test]
    fn geometry_that_cannot_hold_a_record_is_fatal() {
        // frame size 24 leaves 8 body bytes for a 14-byte record
        let r = PREAMBLE.replace("\"64\"", "\"24\"");
        let err = FileHeader::read(&mut r.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::FrameGeometry { .. }));
    }

    #[test]
    fn truncated_preamble_is_fatal() {
        let upto = PREAMBLE.lines().take(3).collect::<Vec<_>>().join("\n");
        let err = FileHeader::read(&mut upto.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Preamble(_)));
    }

    #[test]
    fn line_parsers_agree_on_text_and_bytes() {
        let text = "\"TOB3\",\"BB\",\"CR1000X\"\r\n";
        assert_eq!(
            parse_line_from_text(text),
            parse_line_from_bytes(text.as_bytes())
        );
        assert_eq!(parse_line_from_text(text), vec!["TOB3", "BB", "CR1000X"]);
    }

    #[test_case("100 MSEC", 0.1)]
    #[test_case("100 msec", 0.1; "lowercase msec")]
    #[test_case("500 Usec", 0.0005)]
    #[test_case("1 Sec", 1.0)]
    #[test_case("30 MIN", 1800.0)]
    #[test_case("2 HR", 7200.0)]
    #[test_case("Sec100 Usec", 100.0 * 1e-6; "leading unit noise")]
    fn interval_parsing(text: &str, expected: f64) {
        assert_eq!(parse_interval(text).unwrap(), expected);
    }

    #[test]
    fn interval_with_unknown_unit_fails() {
        assert!(matches!(
            parse_interval("10 fortnights"),
            Err(Error::Frequency(_))
        ));
        assert!(matches!(parse_interval("no digits"), Err(Error::Frequency(_))));
    }

    #[test]
    fn variable_map_carries_schema_fields() {
        let mut r = PREAMBLE.as_bytes();
        let header = FileHeader::read(&mut r).unwrap();
        let map = header.variable_map();
        let ts = &map["Ts"];
        assert_eq!(ts["unit"], MetaValue::Text("C".to_string()));
        assert_eq!(ts["dtype"], MetaValue::Text("IEEE8B".to_string()));
        assert_eq!(ts["ignore"], MetaValue::Flag(false));
    }
}
