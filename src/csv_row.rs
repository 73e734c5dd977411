//! CSV reading and writing for tool output
//!
//! The measurement tools emit comma-separated tables with ragged rows
//! (trailing delimiters, per-section widths) and occasionally quoted cells
//! (pqos quotes its core lists). Reading goes through the `csv` crate in
//! flexible mode; rows are written by hand so the output matches the
//! tools' own formatting.

fn reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
}

fn is_blank(record: &csv::StringRecord) -> bool {
    record.len() <= 1 && record.iter().all(|cell| cell.trim().is_empty())
}

/// Parse a whole table into rows of cells, skipping blank lines
pub fn read_table(text: &str) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut rows = Vec::new();
    for record in reader(text).records() {
        let record = record?;
        if is_blank(&record) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Split one CSV line into cells, honouring double quotes
pub fn split_record(line: &str) -> Result<Vec<String>, csv::Error> {
    let mut records = reader(line).into_records();
    match records.next() {
        Some(record) => Ok(record?.iter().map(str::to_string).collect()),
        None => Ok(Vec::new()),
    }
}

/// Number of whitespace-only lines, which [`read_table`] drops
pub fn blank_lines(text: &str) -> usize {
    text.lines().filter(|line| line.trim().is_empty()).count()
}

/// Escape CSV field (handle commas, quotes, newlines)
pub fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Format cells as one CSV line without the trailing newline
pub fn format_row<S: AsRef<str>>(cells: &[S]) -> String {
    cells
        .iter()
        .map(|cell| escape_field(cell.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a numeric cell; empty or garbage cells yield `None`
pub fn parse_number(cell: &str) -> Option<f64> {
    let text = cell.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Parse a cell that must be a finite, non-negative measurement
pub fn parse_measurement(cell: &str) -> Option<f64> {
    parse_number(cell).filter(|v| v.is_finite() && *v >= 0.0)
}
