// src/samples.rs
//
// Parsed accelerometer records and their CSV persistence.
// A sample file is a header row followed by one row per record in arrival order:
//
//     x1,y1,z1,x2,y2,z2
//     0,250,250,250,0,250
//     2,251,245,251,5,247
//
// Fields containing a comma, a double quote, CR or LF are wrapped in double
// quotes with inner quotes doubled (RFC 4180), so any field value survives a
// save/load round trip.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::PersistenceError;

/// Fields in every record: two 3-axis readings
pub const FIELD_COUNT: usize = 6;

/// Column labels written as the first row of every sample file
pub const HEADER: [&str; FIELD_COUNT] = ["x1", "y1", "z1", "x2", "y2", "z2"];

/// Row terminator used when writing sample files
const ROW_END: &str = "\r\n";

const FIELD_SEP: char = ',';
const QUOTE: char = '"';

// ============================================================================
// Record
// ============================================================================

/// One accelerometer sample. Field values are kept as the device sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: [String; FIELD_COUNT],
}

impl Record {
    pub fn new(fields: [String; FIELD_COUNT]) -> Self {
        Record { fields }
    }

    pub fn fields(&self) -> &[String; FIELD_COUNT] {
        &self.fields
    }

    /// First sensor reading (x1, y1, z1)
    pub fn first(&self) -> [&str; 3] {
        [&self.fields[0], &self.fields[1], &self.fields[2]]
    }

    /// Second sensor reading (x2, y2, z2)
    pub fn second(&self) -> [&str; 3] {
        [&self.fields[3], &self.fields[4], &self.fields[5]]
    }
}

impl TryFrom<Vec<String>> for Record {
    /// Number of fields actually supplied
    type Error = usize;

    fn try_from(fields: Vec<String>) -> Result<Self, Self::Error> {
        let len = fields.len();
        let fields: [String; FIELD_COUNT] = fields.try_into().map_err(|_| len)?;
        Ok(Record { fields })
    }
}

// ============================================================================
// SampleSet
// ============================================================================

/// Records collected during one acquisition session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    records: Vec<Record>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Header row followed by one row per record
    pub fn rows(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        std::iter::once(HEADER.to_vec()).chain(
            self.records
                .iter()
                .map(|r| r.fields.iter().map(String::as_str).collect()),
        )
    }

    /// Write the set as CSV to `writer`
    pub fn write_csv<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for row in self.rows() {
            let line: Vec<Cow<'_, str>> = row.into_iter().map(quote_field).collect();
            write!(writer, "{}{}", line.join(","), ROW_END)?;
        }
        writer.flush()
    }

    /// Write the set to `path`, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        self.write_csv(&mut writer).map_err(io_err)?;
        writer
            .into_inner()
            .map_err(|e| io_err(e.into_error()))?
            .sync_all()
            .map_err(io_err)
    }

    /// Write the set into `dir` under a timestamped file name.
    /// Returns the path written.
    pub fn save_in(&self, dir: &Path, at: DateTime<Local>) -> Result<PathBuf, PersistenceError> {
        std::fs::create_dir_all(dir).map_err(|source| PersistenceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(sample_file_name(at));
        self.save(&path)?;
        Ok(path)
    }
}

/// `bluetooth_data_<YYYYMMDD_HHMMSS>.csv`
pub fn sample_file_name(at: DateTime<Local>) -> String {
    format!("bluetooth_data_{}.csv", at.format("%Y%m%d_%H%M%S"))
}

// ============================================================================
// Read-back
// ============================================================================

/// Quote `field` if it holds a separator, a quote or a line break
fn quote_field(field: &str) -> Cow<'_, str> {
    if field.contains([FIELD_SEP, QUOTE, '\r', '\n']) {
        Cow::Owned(format!("{}{}{}", QUOTE, field.replace(QUOTE, "\"\""), QUOTE))
    } else {
        Cow::Borrowed(field)
    }
}

/// Split CSV text into rows of unquoted fields.
/// Each row carries the line number it starts on. Blank lines are skipped.
fn parse_rows(text: &str) -> Result<Vec<(usize, Vec<String>)>, PersistenceError> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // Whether the current row has seen any character
    let mut started = false;
    let mut line = 1;
    let mut row_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                QUOTE if chars.peek() == Some(&QUOTE) => {
                    chars.next();
                    field.push(QUOTE);
                }
                QUOTE => in_quotes = false,
                _ => {
                    if c == '\n' {
                        line += 1;
                    }
                    field.push(c);
                }
            }
            continue;
        }

        match c {
            QUOTE if field.is_empty() => {
                in_quotes = true;
                started = true;
            }
            FIELD_SEP => {
                row.push(std::mem::take(&mut field));
                started = true;
            }
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                if started {
                    row.push(std::mem::take(&mut field));
                    rows.push((row_line, std::mem::take(&mut row)));
                    started = false;
                }
                line += 1;
                row_line = line;
            }
            _ => {
                field.push(c);
                started = true;
            }
        }
    }

    if in_quotes {
        return Err(PersistenceError::Malformed {
            line: row_line,
            reason: "unterminated quoted field".to_string(),
        });
    }
    if started {
        row.push(field);
        rows.push((row_line, row));
    }
    Ok(rows)
}

/// Load a sample file written by [`SampleSet::save`].
/// The header must match exactly and every row must carry six fields.
pub fn load_csv(path: &Path) -> Result<SampleSet, PersistenceError> {
    let text = std::fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rows = parse_rows(&text)?.into_iter();

    match rows.next() {
        Some((_, header)) if header == HEADER => {}
        Some((line, header)) => {
            return Err(PersistenceError::Malformed {
                line,
                reason: format!("unexpected header {:?}", header.join(",")),
            })
        }
        None => {
            return Err(PersistenceError::Malformed {
                line: 1,
                reason: "file is empty".to_string(),
            })
        }
    }

    let mut set = SampleSet::new();
    for (line, fields) in rows {
        let record = Record::try_from(fields).map_err(|actual| PersistenceError::Malformed {
            line,
            reason: format!("expected {} fields, got {}", FIELD_COUNT, actual),
        })?;
        set.push(record);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(values: [&str; FIELD_COUNT]) -> Record {
        Record::new(values.map(str::to_string))
    }

    fn sample_set() -> SampleSet {
        let mut set = SampleSet::new();
        set.push(record(["0", "250", "250", "250", "0", "250"]));
        set.push(record(["2", "251", "245", "251", "5", "247"]));
        set.push(record(["4", "250", "247", "252", "7", "243"]));
        set
    }

    #[test]
    fn test_record_try_from_checks_count() {
        let ok: Vec<String> = ["1", "2", "3", "4", "5", "6"].iter().map(|s| s.to_string()).collect();
        let record = Record::try_from(ok).unwrap();
        assert_eq!(record.first(), ["1", "2", "3"]);
        assert_eq!(record.second(), ["4", "5", "6"]);

        let short: Vec<String> = vec!["1".to_string()];
        assert_eq!(Record::try_from(short), Err(1));
    }

    #[test]
    fn test_csv_layout() {
        let mut out = Vec::new();
        sample_set().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "x1,y1,z1,x2,y2,z2\r\n0,250,250,250,0,250\r\n2,251,245,251,5,247\r\n4,250,247,252,7,243\r\n"
        );
    }

    #[test]
    fn test_empty_set_writes_header_only() {
        let mut out = Vec::new();
        SampleSet::new().write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "x1,y1,z1,x2,y2,z2\r\n");
    }

    #[test]
    fn test_file_name_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(sample_file_name(at), "bluetooth_data_20240309_070501.csv");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let set = sample_set();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();

        let path = set.save_in(dir.path(), at).unwrap();
        assert_eq!(path.file_name().unwrap(), "bluetooth_data_20240309_070501.csv");

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), set.len() + 1);

        let loaded = load_csv(&path).unwrap();
        assert_eq!(loaded, set);
    }

    #[test]
    fn test_save_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");

        let err = sample_set().save(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[test]
    fn test_load_rejects_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "a,b,c\r\n1,2,3\r\n").unwrap();

        assert!(matches!(
            load_csv(&path),
            Err(PersistenceError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn test_fields_with_separator_quote_and_newline_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = SampleSet::new();
        set.push(record(["a,b", "say \"hi\"", "5\n", "\r\n", "", "7"]));
        set.push(record(["1", "2", "3", "4", "5", "6"]));

        let mut out = Vec::new();
        set.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"a,b\",\"say \"\"hi\"\"\",\"5\n\",\"\r\n\",,7\r\n"));

        let path = set.save_in(dir.path(), Local::now()).unwrap();
        assert_eq!(load_csv(&path).unwrap(), set);
    }

    #[test]
    fn test_plain_fields_are_not_quoted() {
        assert_eq!(quote_field("250"), "250");
        assert_eq!(quote_field("a;b"), "a;b");
        assert_eq!(quote_field("a,b"), "\"a,b\"");
    }

    #[test]
    fn test_load_rejects_unterminated_quote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open.csv");
        std::fs::write(&path, "x1,y1,z1,x2,y2,z2\r\n\"1,2,3,4,5,6\r\n").unwrap();

        assert!(matches!(
            load_csv(&path),
            Err(PersistenceError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn test_load_rejects_short_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "x1,y1,z1,x2,y2,z2\r\n1,2,3,4,5,6\r\n1,2\r\n").unwrap();

        match load_csv(&path) {
            Err(PersistenceError::Malformed { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("got 2"));
            }
            other => panic!("Expected malformed error, got {:?}", other),
        }
    }
}
