//! TAP (Test Anything Protocol) results report.

use std::fmt::Write as _;
use std::path::Path;

use crate::h::Status;
use crate::suite::TestReport;

/// File name of the report inside the output directory.
pub const TAP_FILE: &str = "test.tap";

/// Render reports as TAP version 13, in the order given.
pub fn render(reports: &[TestReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "TAP version 13");
    let _ = writeln!(out, "1..{}", reports.len());

    for (i, report) in reports.iter().enumerate() {
        let n = i + 1;
        let _ = match report.status {
            Status::Failed => writeln!(out, "not ok {} - {}", n, report.name),
            Status::Skipped => writeln!(out, "ok {} - {} # SKIP", n, report.name),
            _ => writeln!(out, "ok {} - {}", n, report.name),
        };
        for line in report.logs.iter().flat_map(|entry| entry.lines()) {
            let _ = writeln!(out, "    # {}", line);
        }
    }

    out
}

/// Write the report to `path`.
pub fn write_report(path: &Path, reports: &[TestReport]) -> std::io::Result<()> {
    std::fs::write(path, render(reports))
}
