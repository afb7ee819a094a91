//! Tabular input and output at the edges of the pipeline.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use calamine::{Data, Reader, open_workbook_auto};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::kmeans::ClusterAssignment;
use super::model::{RawTicket, Tickets};
use crate::error::PipelineError;

/// Supplies the raw ticket records, in order.
pub trait TicketSource {
    fn load(&mut self) -> Result<Vec<RawTicket>>;
}

/// Persists the final labels next to the identifying fields of each ticket.
pub trait ResultSink {
    /// Returns where the artifact ended up.
    fn persist(&mut self, tickets: &Tickets, assignment: &ClusterAssignment) -> Result<PathBuf>;
}

impl TicketSource for Vec<RawTicket> {
    fn load(&mut self) -> Result<Vec<RawTicket>> {
        Ok(std::mem::take(self))
    }
}

/// Column names shared by the input and the export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Columns {
    pub id: String,
    pub description: String,
    pub notes: String,
    /// Used for sample excerpts when present in the input.
    pub short_description: Option<String>,
    /// Header of the label column in the export.
    pub cluster: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            id: "Number".into(),
            description: "Description".into(),
            notes: "Work notes".into(),
            short_description: None,
            cluster: "cluster".into(),
        }
    }
}

/// Header positions of the configured columns in one input table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnIndices {
    id: usize,
    description: usize,
    notes: usize,
    short_description: Option<usize>,
}

impl ColumnIndices {
    /// Every absent required column is named in the error.
    fn resolve<S: AsRef<str>>(columns: &Columns, headers: &[S], source_name: &str) -> Result<Self> {
        let position = |name: &str| headers.iter().position(|h| h.as_ref().trim() == name);

        let required = [&columns.id, &columns.description, &columns.notes];
        let missing = required
            .iter()
            .filter(|c| position(c.as_str()).is_none())
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(anyhow!(PipelineError::MissingInput {
                source_name: source_name.to_owned(),
                missing,
            }));
        }
        let short_description = columns.short_description.as_deref().and_then(|c| {
            let found = position(c);
            if found.is_none() {
                warn!(column = c, "short description column not found, using text excerpts");
            }
            found
        });
        Ok(Self {
            id: position(columns.id.as_str()).unwrap_or_default(),
            description: position(columns.description.as_str()).unwrap_or_default(),
            notes: position(columns.notes.as_str()).unwrap_or_default(),
            short_description,
        })
    }

    /// Build a record from one row; blank or absent cells are `None`.
    fn ticket<'r>(&self, get: impl Fn(usize) -> Option<&'r str>) -> RawTicket {
        let cell = |idx: usize| {
            get(idx)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_owned)
        };
        RawTicket {
            id: get(self.id).unwrap_or_default().trim().into(),
            description: cell(self.description),
            notes: cell(self.notes),
            short_description: self.short_description.and_then(cell),
        }
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(anyhow!(PipelineError::MissingInput {
            source_name: "input file".into(),
            missing: vec![path.display().to_string()],
        }))
    }
}

/// Spreadsheet formats read with calamine; anything else is read as CSV.
const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Pick the reader for `path` by its extension.
pub fn open_ticket_source(path: &Path, columns: Columns) -> Box<dyn TicketSource> {
    let is_spreadsheet = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    if is_spreadsheet {
        Box::new(SpreadsheetTicketSource::new(path, columns))
    } else {
        Box::new(CsvTicketSource::new(path, columns))
    }
}

/// Reads tickets from a CSV file with a header row.
#[derive(Debug, Clone)]
pub struct CsvTicketSource {
    path: PathBuf,
    columns: Columns,
}

impl CsvTicketSource {
    pub fn new<P: Into<PathBuf>>(path: P, columns: Columns) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }
}

impl TicketSource for CsvTicketSource {
    fn load(&mut self) -> Result<Vec<RawTicket>> {
        require_file(&self.path)?;
        let source_name = self.path.display().to_string();

        info!(path = %source_name, "loading tickets");
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("CsvTicketSource: open {}", source_name))?;
        let headers = reader
            .headers()
            .with_context(|| format!("CsvTicketSource: read header of {}", source_name))?
            .iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let indices = ColumnIndices::resolve(&self.columns, headers.as_slice(), &source_name)?;

        let mut tickets = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record
                .with_context(|| format!("CsvTicketSource: {} row {}", source_name, row + 2))?;
            tickets.push(indices.ticket(|i| record.get(i)));
        }
        info!(count = tickets.len(), "tickets loaded");
        Ok(tickets)
    }
}

/// Reads tickets from the first worksheet of a workbook whose first row
/// holds the headers.
#[derive(Debug, Clone)]
pub struct SpreadsheetTicketSource {
    path: PathBuf,
    columns: Columns,
}

impl SpreadsheetTicketSource {
    pub fn new<P: Into<PathBuf>>(path: P, columns: Columns) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }
}

impl TicketSource for SpreadsheetTicketSource {
    fn load(&mut self) -> Result<Vec<RawTicket>> {
        require_file(&self.path)?;
        let source_name = self.path.display().to_string();

        info!(path = %source_name, "loading tickets");
        let mut workbook = open_workbook_auto(&self.path)
            .with_context(|| format!("SpreadsheetTicketSource: open {}", source_name))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| {
                anyhow!(PipelineError::MissingInput {
                    source_name: source_name.clone(),
                    missing: vec!["worksheet".into()],
                })
            })?
            .with_context(|| format!("SpreadsheetTicketSource: read {}", source_name))?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(Data::to_string).collect::<Vec<_>>());
        let headers = rows.next().unwrap_or_default();
        let indices = ColumnIndices::resolve(&self.columns, headers.as_slice(), &source_name)?;

        let tickets = rows
            .map(|cells| indices.ticket(|i| cells.get(i).map(String::as_str)))
            .collect::<Vec<_>>();
        info!(count = tickets.len(), "tickets loaded");
        Ok(tickets)
    }
}

/// Writes `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.csv`, never overwriting.
#[derive(Debug, Clone)]
pub struct CsvResultSink {
    dir: PathBuf,
    prefix: String,
    columns: Columns,
}

impl CsvResultSink {
    pub fn new<P: Into<PathBuf>>(dir: P, prefix: &str, columns: Columns) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_owned(),
            columns,
        }
    }
}

impl ResultSink for CsvResultSink {
    fn persist(&mut self, tickets: &Tickets, assignment: &ClusterAssignment) -> Result<PathBuf> {
        if tickets.len() != assignment.len() {
            return Err(anyhow!(PipelineError::invalid(
                "assignment",
                format!("{} labels for {} tickets", assignment.len(), tickets.len()),
            )));
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("CsvResultSink: create {}", self.dir.display()))?;
        let stamp = jiff::Zoned::now().strftime("%Y%m%d_%H%M%S").to_string();
        let (path, file) = create_unique(&self.dir, &self.prefix, &stamp)?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record([
            &self.columns.id,
            &self.columns.description,
            &self.columns.notes,
            &self.columns.cluster,
        ])?;
        for (ticket, label) in tickets.iter().zip(&assignment.labels) {
            writer.write_record([
                ticket.id().to_string(),
                ticket.raw.description.clone().unwrap_or_default(),
                ticket.raw.notes.clone().unwrap_or_default(),
                label.to_string(),
            ])?;
        }
        writer
            .flush()
            .with_context(|| format!("CsvResultSink: flush {}", path.display()))?;
        info!(path = %path.display(), rows = tickets.len(), "results saved");
        Ok(path)
    }
}

/// Create a new file named after `prefix` and `stamp`, adding `_1`, `_2`, ...
/// when the name is taken.
fn create_unique(dir: &Path, prefix: &str, stamp: &str) -> Result<(PathBuf, File)> {
    let mut attempt = 0usize;
    loop {
        let name = match attempt {
            0 => format!("{}_{}.csv", prefix, stamp),
            n => format!("{}_{}_{}.csv", prefix, stamp, n),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("CsvResultSink: create {}", path.display()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        ColumnIndices, Columns, CsvResultSink, CsvTicketSource, ResultSink, SpreadsheetTicketSource,
        TicketSource, create_unique, open_ticket_source,
    };
    use crate::error::PipelineError;
    use crate::grp::kmeans::ClusterAssignment;
    use crate::grp::model::{ClusterCount, ClusterLabel, RawTicket, Ticket, Tickets};

    fn write_csv(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("task.csv");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "Number,Short description,Description,Work notes,Priority\n\
             INC001,VPN,\"VPN drops\nevery hour\",,2\n\
             INC002,,,,3\n\
             INC003,Mail,Outlook crash,restarted,1\n",
        );
        let columns = Columns {
            short_description: Some("Short description".into()),
            ..Columns::default()
        };
        let tickets = CsvTicketSource::new(&path, columns).load().unwrap();
        assert_eq!(tickets.len(), 3);
        assert_eq!(
            tickets[0],
            RawTicket::new("INC001", Some("VPN drops\nevery hour"), None).with_short_description("VPN")
        );
        assert_eq!(tickets[1], RawTicket::new("INC002", None, None));
        assert_eq!(tickets[2].notes.as_deref(), Some("restarted"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvTicketSource::new(dir.path().join("nope.csv"), Columns::default())
            .load()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_missing_columns_are_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "Number,Notes\nINC1,x\n");
        let err = CsvTicketSource::new(&path, Columns::default())
            .load()
            .unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingInput { missing, .. }) => {
                assert_eq!(missing, &vec!["Description".to_string(), "Work notes".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_columns_resolve_from_any_header_row() {
        let columns = Columns {
            short_description: Some("Short description".into()),
            ..Columns::default()
        };
        let headers = ["Priority", " Number ", "Work notes", "Description", "Short description"];
        let indices = ColumnIndices::resolve(&columns, &headers[..], "sheet").unwrap();

        let row = ["1", "INC7", "", "Mail bounces", "Mail"];
        assert_eq!(
            indices.ticket(|i| row.get(i).copied()),
            RawTicket::new("INC7", Some("Mail bounces"), None).with_short_description("Mail")
        );
        let short_row = ["2", "INC8"];
        assert_eq!(
            indices.ticket(|i| short_row.get(i).copied()),
            RawTicket::new("INC8", None, None)
        );
    }

    #[test]
    fn test_source_chosen_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "Number,Description,Work notes
INC1,Printer jam,
");
        let tickets = open_ticket_source(&path, Columns::default()).load().unwrap();
        assert_eq!(tickets, vec![RawTicket::new("INC1", Some("Printer jam"), None)]);

        for name in ["task.xlsx", "task.XLS", "task.ods"] {
            let err = open_ticket_source(&dir.path().join(name), Columns::default())
                .load()
                .unwrap_err();
            match err.downcast_ref::<PipelineError>() {
                Some(PipelineError::MissingInput { source_name, .. }) => {
                    assert_eq!(source_name, "input file")
                }
                other => panic!("unexpected error for {name}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_unreadable_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.xlsx");
        fs::write(&path, "Number,Description\nnot a workbook\n").unwrap();
        let err = SpreadsheetTicketSource::new(&path, Columns::default())
            .load()
            .unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_none());
        assert!(format!("{err:#}").contains("SpreadsheetTicketSource: open"));
    }

    #[test]
    fn test_persist_writes_labels() {
        let dir = tempfile::tempdir().unwrap();
        let tickets: Tickets = vec![
            Ticket {
                raw: RawTicket::new("INC1", Some("printer, jammed"), None),
                cleaned_text: "printer, jammed".into(),
            },
            Ticket {
                raw: RawTicket::new("INC2", None, Some("vpn")),
                cleaned_text: "vpn".into(),
            },
        ]
        .into();
        let assignment = ClusterAssignment {
            k: ClusterCount::try_new(2).unwrap(),
            labels: vec![ClusterLabel::from(1), ClusterLabel::from(0)],
            inertia: 0.0,
        };
        let out = dir.path().join("out");
        let path = CsvResultSink::new(&out, "clustered_tickets", Columns::default())
            .persist(&tickets, &assignment)
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("clustered_tickets_") && name.ends_with(".csv"));
        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(
            body,
            "Number,Description,Work notes,cluster\nINC1,\"printer, jammed\",,1\nINC2,,vpn,0\n"
        );
    }

    #[test]
    fn test_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = create_unique(dir.path(), "out", "20250101_000000").unwrap();
        let (second, _) = create_unique(dir.path(), "out", "20250101_000000").unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("out_20250101_000000_1.csv"));
    }

    #[test]
    fn test_vec_source() {
        let mut source = vec![RawTicket::new("1", Some("a"), None)];
        assert_eq!(source.load().unwrap().len(), 1);
        assert!(source.load().unwrap().is_empty());
    }
}
