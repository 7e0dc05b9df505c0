use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;

/// JSON-lines record of kernel activity, one object per line.
pub struct TraceWriter {
  writer: BufWriter<File>,
}

impl TraceWriter {
  pub fn create(path: &Path) -> Result<Self> {
    Ok(Self {
      writer: BufWriter::new(File::create(path)?),
    })
  }

  pub fn record(&mut self, time: u64, kind: &str, detail: Value) -> Result<()> {
    let trace_entry = serde_json::json!({
      "time": time,
      "kind": kind,
      "detail": detail,
    });
    writeln!(self.writer, "{}", trace_entry)
  }

  pub fn flush(&mut self) -> Result<()> {
    self.writer.flush()
  }
}
