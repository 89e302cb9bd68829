//! Minimal RFC 4180 style delimited-table writing and parsing.
//!
//! Message text can contain commas, quotes and newlines, so fields are
//! quoted on demand and embedded quotes are doubled. Rows are terminated
//! with CRLF per RFC 4180; the parser accepts bare LF too.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::{errors::Error, Result};

fn needs_quoting(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Quote a single field if its content requires it.
pub fn quote_field(field: &str) -> String {
    if !needs_quoting(field) {
        return field.to_string();
    }
    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for c in field.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Write `rows` to `path` in one pass, overwriting any existing file.
pub fn write_rows(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    for row in rows {
        let line = row
            .iter()
            .map(|f| quote_field(f))
            .collect::<Vec<_>>()
            .join(",");
        w.write_all(line.as_bytes())?;
        w.write_all(b"\r\n")?;
    }
    w.flush()?;
    Ok(())
}

/// Parse delimited rows from `input`.
pub fn parse_rows(input: &str) -> Result<Vec<Vec<String>>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut it = input.chars().peekable();
    while let Some(c) = it.next() {
        if in_quotes {
            if c == '"' {
                if it.peek() == Some(&'"') {
                    it.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {
                if it.peek() == Some(&'\n') {
                    it.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(Error::Data("unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// Read and parse a whole delimited file.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let txt = std::fs::read_to_string(path)?;
    parse_rows(&txt)
}
