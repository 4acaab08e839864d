//! Grid and long-table rendering for [`ListGroup`]s.

use std::fs;
use std::time::SystemTime;

use chrono::{DateTime, Local};

use super::{ListGroup, ListOptions};
use crate::classify::{self, ColorClass, FileTag};
use crate::common::FileEntry;
use crate::humansize;
use crate::pretty::{self, Align, Table};

struct Painter {
    color: bool,
}

impl Painter {
    fn paint(&self, text: &str, class: ColorClass) -> String {
        if self.color {
            classify::paint(text, class).to_string()
        } else {
            text.to_string()
        }
    }

    fn entry(&self, text: &str, tag: FileTag, name: &str) -> String {
        self.paint(text, classify::color_for(tag, name))
    }
}

/// `rwxr-x---`, each granted slot colored by position: read green, write
/// yellow, execute red.
pub fn permission_string(mode: u32, color: bool) -> String {
    let painter = Painter { color };
    let slots = [('r', ColorClass::Green), ('w', ColorClass::Yellow), ('x', ColorClass::Red)];
    let mut out = String::new();
    for shift in [6u32, 3, 0] {
        let triplet = (mode >> shift) & 0o7;
        for (i, (ch, class)) in slots.iter().enumerate() {
            if triplet & (0o4 >> i) != 0 {
                out.push_str(&painter.paint(&ch.to_string(), *class));
            } else {
                out.push('-');
            }
        }
    }
    out
}

pub fn format_time(t: Option<SystemTime>) -> String {
    match t {
        Some(t) => DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}

/// Entry name with optional icon; symlinks as `name -> target`.
fn entry_label(entry: &FileEntry, opts: &ListOptions) -> String {
    let painter = Painter { color: opts.color };
    let icon = if opts.icons { format!("{} ", classify::icon_for(entry.tag, &entry.name)) } else { String::new() };

    if entry.tag != FileTag::Symlink {
        return format!("{}{}", icon, painter.entry(&entry.name, entry.tag, &entry.name));
    }

    let target_text = entry.link_target.as_ref().map(|t| t.to_string_lossy().into_owned()).unwrap_or_default();
    let resolved = entry.resolved_target().and_then(|p| fs::metadata(&p).ok().map(|md| (p, md)));
    let (name, target) = match resolved {
        Some((path, md)) => {
            let tag = classify::classify(&path, &md);
            let target_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            (painter.paint(&entry.name, ColorClass::Cyan), painter.entry(&target_text, tag, &target_name))
        }
        None => (painter.paint(&entry.name, ColorClass::Red), painter.paint(&target_text, ColorClass::Red)),
    };
    format!("{}{} {} {}", icon, name, painter.paint("->", ColorClass::White), target)
}

fn long_table(group: &ListGroup, opts: &ListOptions) -> Table {
    let mut headers = vec!["Type", "Perm"];
    if opts.owner {
        headers.extend(["Owner", "Group"]);
    }
    headers.extend(["Size", "Unit", "ModTime", "Name"]);
    let size_col = headers.len() - 4;

    let mut table = Table::new(headers, opts.table_style).align(size_col, Align::Right);
    for entry in &group.entries {
        let mut row = vec![entry.tag.letter().to_string(), permission_string(entry.mode, opts.color)];
        if opts.owner {
            row.push(entry.owner.clone());
            row.push(entry.group.clone());
        }
        if entry.is_dir() {
            row.extend(["-".to_string(), String::new()]);
        } else {
            let (value, unit) = humansize::split_size(entry.size);
            row.extend([value, unit.to_string()]);
        }
        row.push(format_time(entry.modified));
        row.push(entry_label(entry, opts));
        table.push_row(row);
    }
    table
}

/// Render every group. Groups are separated by a blank line and headed by
/// `dir:` when `show_headers` is set.
pub fn render_groups(groups: &[ListGroup], show_headers: bool, opts: &ListOptions) -> String {
    let width = opts.width.unwrap_or_else(pretty::terminal_width);
    let mut out = String::new();

    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if show_headers {
            if let Some(header) = &group.header {
                out.push_str(&format!("{}:\n", header));
            }
        }
        if group.entries.is_empty() {
            continue;
        }
        if opts.long {
            out.push_str(&long_table(group, opts).render());
        } else {
            let labels: Vec<String> = group.entries.iter().map(|e| entry_label(e, opts)).collect();
            out.push_str(&pretty::grid(&labels, width));
        }
    }
    out
}
