use chrono::Local;
use unicode_width::UnicodeWidthStr;

/// Local wall-clock timestamp for status lines, e.g. "2026-08-30 14:05".
pub fn current_human_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M").to_string()
}

/// Render rows as a bordered ASCII table, width-aware for wide glyphs.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let all_rows: Vec<Vec<String>> =
        std::iter::once(headers.iter().map(|h| h.to_string()).collect())
            .chain(rows.iter().cloned())
            .collect();

    let col_count = all_rows[0].len();
    let mut col_widths = vec![0; col_count];
    for row in &all_rows {
        for (i, cell) in row.iter().enumerate() {
            let width = cell.width();
            if width > col_widths[i] {
                col_widths[i] = width;
            }
        }
    }

    let border = format!(
        "+{}+",
        col_widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );

    let mut out = String::new();
    out.push_str(&border);
    out.push('\n');

    for (row_idx, row) in all_rows.iter().enumerate() {
        let formatted_row = row
            .iter()
            .zip(&col_widths)
            .map(|(cell, width)| {
                let padding = width - cell.width();
                format!(" {}{} ", cell, " ".repeat(padding))
            })
            .collect::<Vec<_>>()
            .join("|");
        out.push_str(&format!("|{}|\n", formatted_row));

        if row_idx == 0 {
            out.push_str(&border);
            out.push('\n');
        }
    }

    out.push_str(&border);
    out
}
