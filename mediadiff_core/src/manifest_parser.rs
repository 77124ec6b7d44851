use csv::{ReaderBuilder, StringRecord};
use encoding_rs::{CoderResult, Decoder, Encoding};
use mediadiff_common::{Dialect, MediaDiffError, Warning, WarningKind};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

/// One data row of a load file, in column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line the record starts on
    pub line: u64,
    pub fields: Vec<(String, String)>,
    /// Fields beyond the header width (lenient mode only)
    pub overflow: Vec<String>,
}

impl RawRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

/// Output of parsing one load file
#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    pub header: Vec<String>,
    pub records: Vec<RawRecord>,
    pub warnings: Vec<Warning>,
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Read and parse a load file from disk.
///
/// The file is decoded in chunks straight into the tokenizer; a load file
/// with a non-ASCII delimiter or quote is read twice, first to find free
/// stand-in bytes.
pub fn parse_file(path: &Path, dialect: &Dialect) -> Result<ParsedManifest, MediaDiffError> {
    let open = || {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| MediaDiffError::io(path, e))
    };
    let parsed = parse_from(open, Some(path), dialect)?;
    debug!(
        "Parsed {} records with {} columns from {:?}",
        parsed.records.len(),
        parsed.header.len(),
        path
    );
    Ok(parsed)
}

/// Parse load file bytes into ordered raw records
pub fn parse(source: &[u8], dialect: &Dialect) -> Result<ParsedManifest, MediaDiffError> {
    parse_from(|| Ok(source), None, dialect)
}

fn parse_from<R, F>(
    open: F,
    path: Option<&Path>,
    dialect: &Dialect,
) -> Result<ParsedManifest, MediaDiffError>
where
    R: Read,
    F: Fn() -> Result<R, MediaDiffError>,
{
    let encoding = Encoding::for_label(dialect.encoding.trim().as_bytes()).ok_or_else(|| {
        MediaDiffError::Encoding(format!("unknown text encoding: {}", dialect.encoding))
    })?;

    let byte_dialect = if dialect.delimiter.is_ascii() && dialect.quote_char.is_ascii() {
        ByteDialect::resolve(0, dialect)?
    } else {
        let present = control_bytes_in(open()?, encoding, dialect.lenient)
            .map_err(|e| read_error(e, path))?;
        ByteDialect::resolve(present, dialect)?
    };

    let text = DecodingReader::new(
        open()?,
        encoding,
        byte_dialect.substitutions.clone(),
        dialect.lenient,
        CHUNK_SIZE,
    );
    let mut reader = ReaderBuilder::new()
        .delimiter(byte_dialect.delimiter)
        .quote(byte_dialect.quote)
        .double_quote(true)
        .has_headers(false)
        .flexible(true)
        .from_reader(text);

    let mut parsed = ParsedManifest::default();
    let mut header: Option<Vec<String>> = if dialect.has_header {
        None
    } else {
        Some(dialect.positional_columns.clone())
    };

    for record in reader.records() {
        let record = record.map_err(|e| csv_error(e, path))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let values = byte_dialect.restore(&record);

        // A line without a single delimiter and only whitespace carries no record
        if values.len() <= 1 && values.iter().all(|v| v.trim().is_empty()) {
            continue;
        }

        let columns = match header.as_ref() {
            Some(columns) => columns,
            None => {
                header = Some(values.iter().map(|v| v.trim().to_string()).collect());
                continue;
            }
        };

        parsed
            .records
            .push(shape_record(line, columns, values, dialect.lenient, &mut parsed.warnings)?);
    }

    parsed.header = header.unwrap_or_default();
    Ok(parsed)
}

fn shape_record(
    line: u64,
    columns: &[String],
    mut values: Vec<String>,
    lenient: bool,
    warnings: &mut Vec<Warning>,
) -> Result<RawRecord, MediaDiffError> {
    let expected = columns.len();
    let found = values.len();
    let mut overflow = Vec::new();

    if found != expected {
        if !lenient {
            return Err(MediaDiffError::MalformedRecord {
                line,
                expected,
                found,
            });
        }

        warn!("Line {}: expected {} fields, found {}", line, expected, found);
        warnings.push(
            Warning::new(
                WarningKind::MalformedRecord,
                format!("expected {} fields, found {}", expected, found),
            )
            .at_line(line),
        );

        if found > expected {
            overflow = values.split_off(expected);
        } else {
            values.resize(expected, String::new());
        }
    }

    Ok(RawRecord {
        line,
        fields: columns.iter().cloned().zip(values).collect(),
        overflow,
    })
}

fn read_error(err: io::Error, path: Option<&Path>) -> MediaDiffError {
    if err.kind() == io::ErrorKind::InvalidData {
        return MediaDiffError::Encoding(err.to_string());
    }
    match path {
        Some(path) => MediaDiffError::io(path, err),
        None => MediaDiffError::Csv(err.to_string()),
    }
}

fn csv_error(err: csv::Error, path: Option<&Path>) -> MediaDiffError {
    match (err.kind(), path) {
        (csv::ErrorKind::Io(source), _) if source.kind() == io::ErrorKind::InvalidData => {
            MediaDiffError::Encoding(source.to_string())
        }
        (csv::ErrorKind::Io(_), Some(path)) => {
            MediaDiffError::Csv(format!("{}: {}", path.display(), err))
        }
        _ => MediaDiffError::Csv(err.to_string()),
    }
}

/// Bitmask of the ASCII control bytes below 0x20 present in the decoded text
fn control_bytes_in<R: Read>(
    source: R,
    encoding: &'static Encoding,
    lenient: bool,
) -> io::Result<u32> {
    let mut text = DecodingReader::new(source, encoding, Vec::new(), lenient, CHUNK_SIZE);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut present = 0u32;
    loop {
        let n = match text.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for byte in buffer[..n].iter().filter(|b| **b < 0x20) {
            present |= 1u32 << *byte;
        }
    }
    Ok(present)
}

/// Decodes a byte stream to UTF-8 one chunk at a time.
///
/// A byte order mark overrides the configured encoding and is stripped.
/// Malformed sequences fail the read with `InvalidData` unless lenient, in
/// which case they are replaced. Each `(stand_in, original)` substitution
/// swaps `original` for `stand_in` in the decoded text.
struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    output: String,
    consumed: usize,
    finished: bool,
    substitutions: Vec<(char, char)>,
    lenient: bool,
    replaced: bool,
}

impl<R: Read> DecodingReader<R> {
    fn new(
        inner: R,
        encoding: &'static Encoding,
        substitutions: Vec<(char, char)>,
        lenient: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            input: vec![0u8; chunk_size.max(1)],
            output: String::new(),
            consumed: 0,
            finished: false,
            substitutions,
            lenient,
            replaced: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let read = loop {
            match self.inner.read(&mut self.input) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        let last = read == 0;

        self.output.clear();
        self.consumed = 0;
        let mut start = 0;
        let mut malformed = false;
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(read - start)
                .unwrap_or(read - start + 16);
            self.output.reserve(needed);
            let (result, used, had_errors) =
                self.decoder
                    .decode_to_string(&self.input[start..read], &mut self.output, last);
            start += used;
            malformed |= had_errors;
            if result == CoderResult::InputEmpty {
                break;
            }
        }
        self.finished = last;

        if malformed {
            let name = self.decoder.encoding().name();
            if !self.lenient {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("load file is not valid {}", name),
                ));
            }
            if !self.replaced {
                warn!("Replaced malformed {} sequences in load file", name);
                self.replaced = true;
            }
        }

        for (stand_in, original) in &self.substitutions {
            if self.output.contains(*original) {
                self.output = self.output.replace(*original, &stand_in.to_string());
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.consumed == self.output.len() {
            if self.finished {
                return Ok(0);
            }
            self.fill()?;
        }

        let pending = &self.output.as_bytes()[self.consumed..];
        let n = pending.len().min(buf.len());
        buf[..n].copy_from_slice(&pending[..n]);
        self.consumed += n;
        Ok(n)
    }
}

/// Single-byte stand-ins for the dialect's delimiter and quote.
///
/// The tokenizer works on bytes, so a non-ASCII delimiter or quote (the
/// Concordance thorn is two bytes in UTF-8) is swapped for an ASCII control
/// byte that does not occur in the text, and swapped back in field values.
struct ByteDialect {
    delimiter: u8,
    quote: u8,
    substitutions: Vec<(char, char)>,
}

impl ByteDialect {
    /// `present` is the bitmask of control bytes already used by the text
    fn resolve(present: u32, dialect: &Dialect) -> Result<ByteDialect, MediaDiffError> {
        let mut taken = present | (1u32 << b'\t') | (1u32 << b'\n') | (1u32 << b'\r');
        for c in [dialect.delimiter, dialect.quote_char] {
            if (c as u32) < 0x20 {
                taken |= 1u32 << (c as u32);
            }
        }
        let mut substitutions = Vec::new();

        let mut byte_for = |original: char| -> Result<u8, MediaDiffError> {
            if original.is_ascii() {
                return Ok(original as u8);
            }
            let stand_in = (0x01u8..0x20)
                .find(|b| taken & (1u32 << *b) == 0)
                .ok_or_else(|| {
                    MediaDiffError::Config(format!(
                        "no free control byte to stand in for {:?}",
                        original
                    ))
                })?;
            taken |= 1u32 << stand_in;
            substitutions.push((char::from(stand_in), original));
            Ok(stand_in)
        };

        let delimiter = byte_for(dialect.delimiter)?;
        let quote = byte_for(dialect.quote_char)?;

        Ok(ByteDialect {
            delimiter,
            quote,
            substitutions,
        })
    }

    fn restore(&self, record: &StringRecord) -> Vec<String> {
        record
            .iter()
            .map(|field| {
                let mut value = field.to_string();
                for (stand_in, original) in &self.substitutions {
                    if value.contains(*stand_in) {
                        value = value.replace(*stand_in, &original.to_string());
                    }
                }
                value
            })
            .collect()
    }
}
