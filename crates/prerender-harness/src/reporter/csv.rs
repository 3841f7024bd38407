//! CSV row sink
//!
//! Column order and the presence of the header row on first write are part
//! of the output contract, as is the `TimeOut` sentinel in numeric columns
//! for failed or skipped trials. Rows are flushed as they are written.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::TrialRow;

/// Sentinel written to numeric timing columns for failed/timed-out trials.
pub const TIMEOUT_SENTINEL: &str = "TimeOut";

/// Number of detail columns emitted per candidate slot.
const CANDIDATE_COLUMNS: usize = 7;

/// Appends trial rows to a delimited output stream.
pub struct CsvSink<W: Write> {
    writer: W,
    candidate_slots: usize,
    wrote_header: bool,
}

impl CsvSink<BufWriter<File>> {
    /// Create (truncating) the output file at `path`.
    ///
    /// `candidate_slots` fixes the number of per-candidate column groups in
    /// the header and every row.
    pub fn create<P: AsRef<Path>>(path: P, candidate_slots: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self::from_writer(BufWriter::new(file), candidate_slots))
    }
}

impl<W: Write> CsvSink<W> {
    /// Wrap an arbitrary writer (used by tests and in-memory sinks).
    pub fn from_writer(writer: W, candidate_slots: usize) -> Self {
        Self {
            writer,
            candidate_slots,
            wrote_header: false,
        }
    }

    /// Append one row, writing the header first if this is the first write.
    pub fn write_row(&mut self, row: &TrialRow) -> Result<()> {
        if !self.wrote_header {
            self.write_header()?;
            self.wrote_header = true;
        }

        let mut fields: Vec<String> = vec![
            quote(&row.condition),
            quote(&row.destination),
            row.trial_no.to_string(),
            timing_field(row.lcp_ms),
            timing_field(row.fcp_ms),
            format!("{:.2}", row.transfer_mb),
            row.prerendered.to_string(),
        ];
        for slot in 0..self.candidate_slots {
            match row.candidates.get(slot) {
                Some(candidate) => {
                    fields.push(quote(&candidate.url));
                    fields.push(candidate.started.to_string());
                    fields.push(quote(&candidate.result));
                    fields.push(opt_num(candidate.http_status.map(|s| s.to_string())));
                    fields.push(opt_str(candidate.error.as_deref()));
                    fields.push(opt_num(candidate.duration_ms.map(|d| d.to_string())));
                    fields.push(opt_num(candidate.transfer_kb.map(|kb| format!("{kb:.2}"))));
                }
                None => {
                    for _ in 0..CANDIDATE_COLUMNS {
                        fields.push(String::new());
                    }
                }
            }
        }

        writeln!(self.writer, "{}", fields.join(","))
            .context("Failed to write output row")?;
        self.writer.flush().context("Failed to flush output row")?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut columns: Vec<String> = [
            "Condition",
            "Page",
            "Trial_No",
            "LCP_ms",
            "FCP_ms",
            "Transfer_MB",
            "Prerendered",
        ]
        .iter()
        .map(|c| (*c).to_string())
        .collect();
        for slot in 1..=self.candidate_slots {
            columns.push(format!("PR_Target{slot}_URL"));
            columns.push(format!("PR_T{slot}_ReqStarted"));
            columns.push(format!("PR_T{slot}_Result"));
            columns.push(format!("PR_T{slot}_HTTPStatus"));
            columns.push(format!("PR_T{slot}_Error"));
            columns.push(format!("PR_T{slot}_Duration_ms"));
            columns.push(format!("PR_T{slot}_Transfer_KB"));
        }
        writeln!(self.writer, "{}", columns.join(","))
            .context("Failed to write output header")?;
        Ok(())
    }

    /// Consume the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn timing_field(value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{ms:.2}"),
        None => quote(TIMEOUT_SENTINEL),
    }
}

fn opt_num(value: Option<String>) -> String {
    value.unwrap_or_default()
}

fn opt_str(value: Option<&str>) -> String {
    value.map(quote).unwrap_or_default()
}

/// Quote a string field, doubling embedded quotes.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CandidateReport;

    fn sink() -> CsvSink<Vec<u8>> {
        CsvSink::from_writer(Vec::new(), 2)
    }

    fn output(sink: CsvSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    fn row_with_candidate() -> TrialRow {
        TrialRow {
            condition: "vanilla".to_string(),
            destination: "Light".to_string(),
            trial_no: 1,
            lcp_ms: Some(123.456),
            fcp_ms: Some(45.0),
            transfer_mb: 1.5,
            prerendered: true,
            candidates: vec![CandidateReport {
                url: "https://depth.lab-ish.com/".to_string(),
                started: true,
                result: "finished".to_string(),
                http_status: Some(200),
                error: None,
                duration_ms: Some(310),
                transfer_kb: Some(2.0),
            }],
        }
    }

    #[test]
    fn test_header_written_once_on_first_row() {
        let mut sink = sink();
        sink.write_row(&row_with_candidate()).unwrap();
        sink.write_row(&row_with_candidate()).unwrap();

        let text = output(sink);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Condition,Page,Trial_No,LCP_ms,FCP_ms,Transfer_MB,Prerendered"));
        assert!(lines[0].contains("PR_Target1_URL"));
        assert!(lines[0].contains("PR_T2_Transfer_KB"));
        assert!(!lines[1].contains("Condition"));
    }

    #[test]
    fn test_row_formats_values() {
        let mut sink = sink();
        sink.write_row(&row_with_candidate()).unwrap();

        let text = output(sink);
        let data = text.lines().nth(1).unwrap();
        assert!(data.starts_with("\"vanilla\",\"Light\",1,123.46,45.00,1.50,true"));
        assert!(data.contains("\"https://depth.lab-ish.com/\",true,\"finished\",200,,310,2.00"));
    }

    #[test]
    fn test_missing_candidate_slots_are_padded() {
        let mut sink = sink();
        sink.write_row(&row_with_candidate()).unwrap();

        let text = output(sink);
        let data = text.lines().nth(1).unwrap();
        let commas = data.matches(',').count();
        // 7 page columns + 2 slots x 7 columns = 21 fields, 20 separators.
        assert_eq!(commas, 20);
        assert!(data.ends_with(",,,,,,"));
    }

    #[test]
    fn test_sentinel_for_timed_out_trial() {
        let mut sink = sink();
        sink.write_row(&TrialRow::synthetic("Fast 3G", "Heavy", 9)).unwrap();

        let text = output(sink);
        let data = text.lines().nth(1).unwrap();
        assert!(data.contains("\"TimeOut\",\"TimeOut\",0.00,false"));
    }

    #[test]
    fn test_embedded_quotes_are_doubled() {
        let mut row = row_with_candidate();
        row.candidates[0].error = Some("net::ERR \"quoted\"".to_string());
        let mut sink = sink();
        sink.write_row(&row).unwrap();

        let text = output(sink);
        assert!(text.contains("\"net::ERR \"\"quoted\"\"\""));
    }
}
