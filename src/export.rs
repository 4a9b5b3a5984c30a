use unicode_width::UnicodeWidthStr;

use crate::relation::{Relation, Value};

pub fn to_csv(relation: &Relation) -> String {
    let mut output = String::new();

    // Header
    let headers: Vec<String> = relation
        .columns()
        .iter()
        .map(|c| csv_escape(&c.name))
        .collect();
    output.push_str(&headers.join(","));
    output.push('\n');

    // Rows
    for row in rows(relation) {
        let cells: Vec<String> = row
            .iter()
            .map(|value| csv_escape(&value_to_csv(value)))
            .collect();
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

pub fn to_tsv(relation: &Relation) -> String {
    let mut output = String::new();

    let headers: Vec<String> = relation
        .columns()
        .iter()
        .map(|c| c.name.replace('\t', " "))
        .collect();
    output.push_str(&headers.join("\t"));
    output.push('\n');

    for row in rows(relation) {
        let cells: Vec<String> = row
            .iter()
            .map(|value| value_to_csv(value).replace(['\t', '\n'], " "))
            .collect();
        output.push_str(&cells.join("\t"));
        output.push('\n');
    }

    output
}

pub fn to_json(relation: &Relation) -> String {
    serde_json::to_string_pretty(&relation.to_json_records()).unwrap_or_else(|_| "[]".to_string())
}

/// Column-aligned plain text, padded by display width so wide characters
/// line up.
pub fn to_table(relation: &Relation) -> String {
    let headers: Vec<&str> = relation.columns().iter().map(|c| c.name.as_str()).collect();
    let cells: Vec<Vec<String>> = rows(relation)
        .map(|row| row.iter().map(|v| v.display()).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.width());
        }
    }

    let mut output = String::new();
    output.push_str(&format_line(headers.iter().copied(), &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&format_line(separator.iter().map(String::as_str), &widths));
    for row in &cells {
        output.push_str(&format_line(row.iter().map(String::as_str), &widths));
    }
    output.push_str(&format!(
        "({} row{})\n",
        relation.num_rows(),
        if relation.num_rows() == 1 { "" } else { "s" }
    ));
    output
}

fn format_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| {
            let pad = width.saturating_sub(cell.width());
            format!("{}{}", cell, " ".repeat(pad))
        })
        .collect();
    let mut line = padded.join(" | ").trim_end().to_string();
    line.push('\n');
    line
}

fn rows(relation: &Relation) -> impl Iterator<Item = Vec<&Value>> + '_ {
    (0..relation.num_rows()).filter_map(move |i| relation.row(i))
}

fn value_to_csv(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.display(),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
