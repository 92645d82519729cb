//! Trade history appended to a CSV file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::domain::error::BotError;
use crate::domain::trade_record::TradeRecord;
use crate::ports::trade_log_port::TradeLogPort;

pub struct CsvTradeLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvTradeLog {
    /// Open `path` for appending; the header is written only to a new or empty file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BotError> {
        let path = path.as_ref().to_path_buf();
        let has_rows = std::fs::metadata(&path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(!has_rows)
            .from_writer(file);
        Ok(CsvTradeLog { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeLogPort for CsvTradeLog {
    fn record(&mut self, trade: &TradeRecord) -> Result<(), BotError> {
        self.writer
            .serialize(trade)
            .map_err(|e| BotError::TradeLog {
                reason: format!("{}: {}", self.path.display(), e),
            })?;
        self.writer.flush()?;
        Ok(())
    }
}
