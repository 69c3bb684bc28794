//! Record ingestion.
//!
//! # Responsibility
//! - Turn a line-oriented source into an ordered, validated record set.
//! - Create and register a new package from that record set.
//!
//! # Invariants
//! - Records keep source order and their 1-based source line.
//! - A source with blank lines between records, malformed lines or duplicates is
//!   rejected as a whole; nothing is stored.
//! - Record contents are never logged.

use crate::model::chunk::Record;
use crate::model::error::ErrorKind;
use crate::model::package::{Package, PackageId};
use crate::model::policy::PackageProcessingPolicy;
use crate::repo::package_repo::{PackageRepository, RepoError};
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::BufRead;

const FIELD_SEPARATOR: char = ',';

pub type IngestResult<T> = Result<T, IngestError>;

/// Ingestion failure.
#[derive(Debug)]
pub enum IngestError {
    Io(std::io::Error),
    /// Source holds no records.
    EmptyInput,
    /// Blank line followed by more records.
    EmptyLine { line: u64 },
    /// Field count differs from the first record, or a field is blank.
    MalformedLine {
        line: u64,
        expected_fields: usize,
        found_fields: usize,
    },
    DuplicateRecord { line: u64, first_line: u64 },
    Repo(RepoError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Storage,
            Self::Repo(err) => err.kind(),
            Self::EmptyInput
            | Self::EmptyLine { .. }
            | Self::MalformedLine { .. }
            | Self::DuplicateRecord { .. } => ErrorKind::Validation,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::EmptyInput => "empty_input",
            Self::EmptyLine { .. } => "empty_line",
            Self::MalformedLine { .. } => "malformed_line",
            Self::DuplicateRecord { .. } => "duplicate_record",
            Self::Repo(_) => "repo",
        }
    }
}

impl Display for IngestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read records: {err}"),
            Self::EmptyInput => write!(f, "source contains no records"),
            Self::EmptyLine { line } => write!(f, "empty line {line} inside record set"),
            Self::MalformedLine {
                line,
                expected_fields,
                found_fields,
            } => write!(
                f,
                "malformed line {line}: expected {expected_fields} non-empty fields, found {found_fields}"
            ),
            Self::DuplicateRecord { line, first_line } => {
                write!(f, "line {line} duplicates line {first_line}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RepoError> for IngestError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Parses comma-separated records, one per line.
///
/// Field values are trimmed; the first record fixes the field count. Trailing blank
/// lines are ignored.
pub fn parse_records(reader: impl BufRead) -> IngestResult<Vec<Record>> {
    let mut records = Vec::new();
    let mut first_seen: HashMap<String, u64> = HashMap::new();
    let mut expected_fields: Option<usize> = None;
    let mut blank_line: Option<u64> = None;
    let mut line_no: u64 = 0;

    for line in reader.lines() {
        let line = line?;
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_line.get_or_insert(line_no);
            continue;
        }
        if let Some(line) = blank_line {
            return Err(IngestError::EmptyLine { line });
        }

        let fields: Vec<&str> = trimmed.split(FIELD_SEPARATOR).map(str::trim).collect();
        let expected = *expected_fields.get_or_insert(fields.len());
        if fields.len() != expected || fields.iter().any(|field| field.is_empty()) {
            return Err(IngestError::MalformedLine {
                line: line_no,
                expected_fields: expected,
                found_fields: fields.iter().filter(|field| !field.is_empty()).count(),
            });
        }

        let normalized = fields.join(",");
        if let Some(&first_line) = first_seen.get(&normalized) {
            return Err(IngestError::DuplicateRecord {
                line: line_no,
                first_line,
            });
        }
        first_seen.insert(normalized.clone(), line_no);
        records.push(Record::new(line_no, normalized));
    }

    if records.is_empty() {
        return Err(IngestError::EmptyInput);
    }
    Ok(records)
}

/// Parses `reader` and stores the records as a new open package.
///
/// Returns the id of the created package.
pub fn ingest_package<R: PackageRepository + ?Sized>(
    repo: &R,
    reader: impl BufRead,
    policy: PackageProcessingPolicy,
) -> IngestResult<PackageId> {
    let records = parse_records(reader).map_err(|err| {
        warn!(
            "event=ingest module=ingest status=rejected error_code={} error={err}",
            err.code()
        );
        err
    })?;

    let record_count = records.len();
    let mut package = Package::new(records, policy);
    repo.save_package(&mut package)?;

    info!(
        "event=ingest module=ingest status=ok package_id={} records={record_count} task_size={} group_size={}",
        package.id(),
        policy.task_size(),
        policy.group_size()
    );
    Ok(package.id())
}
