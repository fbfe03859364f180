use anyhow::Context;
use std::fs;
use std::path::PathBuf;
use time::format_description;

use crate::page::Record;

/// In-memory accumulator plus the two durable artifacts: the CSV dataset
/// snapshot and the plain-text resume cursor. Owned by the driver; nothing
/// else mutates it.
pub struct Store {
    records: Vec<Record>,
    dataset_path: PathBuf,
    cursor_path: PathBuf,
}

impl Store {
    pub fn new(dataset_path: PathBuf, cursor_path: PathBuf) -> Self {
        Store {
            records: Vec::new(),
            dataset_path,
            cursor_path,
        }
    }

    /// No deduplication: a page re-fetched after a crash re-appends its
    /// records, which is the accepted cost of the independent
    /// dataset/cursor writes.
    pub fn append(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Next page to fetch. Absent or unusable cursor means a fresh run.
    pub fn read_cursor(&self) -> u32 {
        match fs::read_to_string(&self.cursor_path) {
            Ok(raw) => raw.trim().parse::<u32>().ok().filter(|&p| p >= 1).unwrap_or(1),
            Err(_) => 1,
        }
    }

    /// Full-snapshot rewrite of the dataset file.
    pub fn write_dataset(&self) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(&self.dataset_path)
            .with_context(|| format!("open dataset {}", self.dataset_path.display()))?;
        writer.write_record(["code", "shortName", "title", "issueDate", "pdfName"])?;
        let format = format_description::parse("[year]-[month]-[day]")?;
        for record in &self.records {
            let day = record.issue_date.format(&format)?;
            writer.write_record([
                record.security_code.as_str(),
                record.security_abbr.as_str(),
                record.title.as_str(),
                day.as_str(),
                record.pdf_name.as_str(),
            ])?;
        }
        writer
            .flush()
            .with_context(|| format!("flush dataset {}", self.dataset_path.display()))?;
        Ok(())
    }

    /// Snapshot then cursor, in that order. The two writes are independent;
    /// a crash in between leaves the dataset ahead of the cursor, which a
    /// resumed run repairs by re-fetching at most one batch of pages.
    pub fn checkpoint(&self, next_page: u32) -> anyhow::Result<()> {
        self.write_dataset()?;
        fs::write(&self.cursor_path, next_page.to_string())
            .with_context(|| format!("write cursor {}", self.cursor_path.display()))?;
        Ok(())
    }

    /// Final snapshot; deleting the cursor marks the harvest as complete.
    pub fn finalize(&self) -> anyhow::Result<()> {
        self.write_dataset()?;
        if self.cursor_path.exists() {
            fs::remove_file(&self.cursor_path)
                .with_context(|| format!("remove cursor {}", self.cursor_path.display()))?;
        }
        Ok(())
    }
}
