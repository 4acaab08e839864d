//! Table and grid printing shared by `list`, `preview` and `diff`.
//!
//! Widths are measured on the visible text: ANSI color sequences produced by
//! `colored` are stripped before counting.

use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;

/// Border set for [`Table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TableStyle {
    /// ASCII `+-|` borders.
    #[default]
    Default,
    /// Unicode box drawing with rounded corners.
    Rounded,
    /// Columns separated by spaces, no borders.
    Plain,
    Markdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

struct Borders {
    top: Option<[&'static str; 4]>,
    mid: Option<[&'static str; 4]>,
    bottom: Option<[&'static str; 4]>,
    horizontal: &'static str,
    vertical: [&'static str; 3],
}

impl TableStyle {
    fn borders(self) -> Borders {
        match self {
            TableStyle::Default => Borders {
                top: Some(["+", "+", "+", "-"]),
                mid: Some(["+", "+", "+", "-"]),
                bottom: Some(["+", "+", "+", "-"]),
                horizontal: "-",
                vertical: ["| ", " | ", " |"],
            },
            TableStyle::Rounded => Borders {
                top: Some(["╭", "┬", "╮", "─"]),
                mid: Some(["├", "┼", "┤", "─"]),
                bottom: Some(["╰", "┴", "╯", "─"]),
                horizontal: "─",
                vertical: ["│ ", " │ ", " │"],
            },
            TableStyle::Plain => Borders { top: None, mid: None, bottom: None, horizontal: "", vertical: ["", "  ", ""] },
            TableStyle::Markdown => Borders {
                top: None,
                mid: Some(["|", "|", "|", "-"]),
                bottom: None,
                horizontal: "-",
                vertical: ["| ", " | ", " |"],
            },
        }
    }
}

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("static regex"))
}

pub fn strip_ansi(s: &str) -> String {
    ansi_regex().replace_all(s, "").into_owned()
}

/// Printable width of `s` in characters.
pub fn visible_width(s: &str) -> usize {
    if s.contains('\x1b') {
        strip_ansi(s).chars().count()
    } else {
        s.chars().count()
    }
}

fn pad(s: &str, width: usize, align: Align) -> String {
    let fill = " ".repeat(width.saturating_sub(visible_width(s)));
    match align {
        Align::Left => format!("{}{}", s, fill),
        Align::Right => format!("{}{}", fill, s),
    }
}

/// Width of the terminal on stdout, 80 when unknown.
pub fn terminal_width() -> usize {
    term_size::dimensions_stdout().map(|(w, _)| w).filter(|w| *w > 0).unwrap_or(80)
}

/// A simple column table.
#[derive(Debug, Clone)]
pub struct Table {
    headers: Vec<String>,
    aligns: Vec<Align>,
    rows: Vec<Vec<String>>,
    style: TableStyle,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>, style: TableStyle) -> Self {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let aligns = vec![Align::Left; headers.len()];
        Self { headers, aligns, rows: Vec::new(), style }
    }

    pub fn align(mut self, column: usize, align: Align) -> Self {
        if let Some(a) = self.aligns.get_mut(column) {
            *a = align;
        }
        self
    }

    /// Add a row. Short rows are padded with empty cells, extra cells dropped.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| visible_width(h)).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(visible_width(cell));
            }
        }
        widths
    }

    fn rule(widths: &[usize], parts: [&str; 4], horizontal: &str) -> String {
        let [left, cross, right, _] = parts;
        let segments: Vec<String> = widths.iter().map(|w| horizontal.repeat(w + 2)).collect();
        format!("{}{}{}\n", left, segments.join(cross), right)
    }

    fn line(&self, cells: &[String], widths: &[usize], b: &Borders) -> String {
        let last = cells.len().saturating_sub(1);
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| {
                // plain tables do not pad the last column
                if self.style == TableStyle::Plain && i == last && self.aligns[i] == Align::Left {
                    c.clone()
                } else {
                    pad(c, widths[i], self.aligns[i])
                }
            })
            .collect();
        format!("{}{}{}\n", b.vertical[0], padded.join(b.vertical[1]), b.vertical[2])
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let b = self.style.borders();
        let mut out = String::new();

        if let Some(top) = b.top {
            out.push_str(&Self::rule(&widths, top, b.horizontal));
        }
        out.push_str(&self.line(&self.headers, &widths, &b));
        if let Some(mid) = b.mid {
            if self.style == TableStyle::Markdown {
                let segments: Vec<String> = widths
                    .iter()
                    .zip(&self.aligns)
                    .map(|(w, a)| match a {
                        Align::Left => "-".repeat(w + 2),
                        Align::Right => format!("{}:", "-".repeat(w + 1)),
                    })
                    .collect();
                out.push_str(&format!("|{}|\n", segments.join("|")));
            } else {
                out.push_str(&Self::rule(&widths, mid, b.horizontal));
            }
        }
        for row in &self.rows {
            out.push_str(&self.line(row, &widths, &b));
        }
        if let Some(bottom) = b.bottom {
            out.push_str(&Self::rule(&widths, bottom, b.horizontal));
        }
        out
    }
}

/// Lay `items` out in columns, filling top to bottom then left to right.
///
/// Column count is `width / (longest + 2)`, at least one.
pub fn grid(items: &[String], width: usize) -> String {
    if items.is_empty() {
        return String::new();
    }
    let longest = items.iter().map(|s| visible_width(s)).max().unwrap_or(0);
    let cell = longest + 2;
    let cols = (width / cell).max(1).min(items.len());
    let rows = items.len().div_ceil(cols);

    let mut out = String::new();
    for r in 0..rows {
        let mut line = String::new();
        for c in 0..cols {
            let Some(item) = items.get(c * rows + r) else {
                break;
            };
            let is_last = c + 1 == cols || (c + 1) * rows + r >= items.len();
            if is_last {
                line.push_str(item);
            } else {
                line.push_str(&pad(item, cell, Align::Left));
            }
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use colored::Colorize;

    fn sample(style: TableStyle) -> String {
        let mut t = Table::new(["Name", "Size"], style).align(1, Align::Right);
        t.push_row(vec!["a.txt".into(), "10".into()]);
        t.push_row(vec!["longer.bin".into(), "2048".into()]);
        t.render()
    }

    #[test]
    fn default_style() {
        let expected = "\
+------------+------+
| Name       | Size |
+------------+------+
| a.txt      |   10 |
| longer.bin | 2048 |
+------------+------+
";
        assert_eq!(sample(TableStyle::Default), expected);
    }

    #[test]
    fn markdown_style() {
        let out = sample(TableStyle::Markdown);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "| Name       | Size |");
        assert_eq!(lines[1], "|------------|-----:|");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn rounded_and_plain_styles() {
        assert!(sample(TableStyle::Rounded).starts_with("╭"));
        let plain = sample(TableStyle::Plain);
        assert_eq!(plain.lines().next(), Some("Name        Size"));
    }

    #[test]
    fn colored_cells_do_not_skew_widths() {
        colored::control::set_override(true);
        let red = "ab".red().to_string();
        colored::control::unset_override();
        assert_eq!(visible_width(&red), 2);
        assert_eq!(strip_ansi(&red), "ab");
    }

    #[test]
    fn grid_is_column_major() {
        let items: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        // longest 1 -> cell 3 -> 3 columns in width 9, 2 rows
        assert_eq!(grid(&items, 9), "a  c  e\nb  d\n");
        assert_eq!(grid(&items, 1), "a\nb\nc\nd\ne\n");
        assert_eq!(grid(&[], 80), "");
    }
}
