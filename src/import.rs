//! Plain-text documents
//!
//! Blocks are separated by blank lines. `# ` starts a heading, `[page N]` is
//! a print page marker, lines of `|a|b|` form table rows and `===` forces a
//! section break. Sections are otherwise cut every `section_size` blocks; a
//! document that ends up with one section keeps its blocks under the root.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use log::debug;
use regex::Regex;

use crate::document::{Document, DocumentError, NodeId, NodeKind};

static PRINT_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[page\s+([^\]\s]+)\]$").expect("Failed to compile page marker regex"));
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").expect("Failed to compile heading regex"));
static SECTION_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^={3,}$").expect("Failed to compile section break regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Block { style: String, text: String },
    PrintPage(String),
    Table(Vec<Vec<String>>),
    SectionBreak,
}

fn table_row(line: &str) -> Option<Vec<String>> {
    let inner = line.trim().strip_prefix('|')?.strip_suffix('|')?;
    Some(inner.split('|').map(|c| c.trim().to_string()).collect())
}

fn parse(text: &str) -> Vec<Item> {
    let mut items = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    let flush = |paragraph: &mut Vec<&str>, rows: &mut Vec<Vec<String>>, items: &mut Vec<Item>| {
        if !paragraph.is_empty() {
            items.push(Item::Block {
                style: "p".into(),
                text: paragraph.join(" "),
            });
            paragraph.clear();
        }
        if !rows.is_empty() {
            items.push(Item::Table(std::mem::take(rows)));
        }
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut paragraph, &mut rows, &mut items);
            continue;
        }
        if let Some(row) = table_row(line) {
            if !paragraph.is_empty() {
                flush(&mut paragraph, &mut rows, &mut items);
            }
            rows.push(row);
            continue;
        }
        if SECTION_BREAK_RE.is_match(line) {
            flush(&mut paragraph, &mut rows, &mut items);
            items.push(Item::SectionBreak);
        } else if let Some(caps) = PRINT_PAGE_RE.captures(line) {
            flush(&mut paragraph, &mut rows, &mut items);
            items.push(Item::PrintPage(caps[1].to_string()));
        } else if let Some(caps) = HEADING_RE.captures(line) {
            flush(&mut paragraph, &mut rows, &mut items);
            items.push(Item::Block {
                style: format!("h{}", caps[1].len()),
                text: caps[2].trim().to_string(),
            });
        } else {
            if !rows.is_empty() {
                flush(&mut paragraph, &mut rows, &mut items);
            }
            paragraph.push(line);
        }
    }
    flush(&mut paragraph, &mut rows, &mut items);
    items
}

fn append_item(doc: &mut Document, parent: NodeId, item: &Item) -> Result<(), DocumentError> {
    match item {
        Item::Block { style, text } => {
            let block = doc.append(parent, NodeKind::block(style.as_str()))?;
            doc.append(block, NodeKind::text(text.as_str()))?;
        }
        Item::PrintPage(number) => {
            doc.append(parent, NodeKind::print_page(number.as_str()))?;
        }
        Item::Table(rows) => {
            let table = doc.append(parent, NodeKind::Table)?;
            for cells in rows {
                let row = doc.append(table, NodeKind::TableRow)?;
                for text in cells {
                    let cell = doc.append(row, NodeKind::TableCell)?;
                    doc.append(cell, NodeKind::text(text.as_str()))?;
                }
            }
        }
        Item::SectionBreak => {}
    }
    Ok(())
}

/// Build a document from plain text
pub fn import_text(text: &str, section_size: usize) -> Result<Document, DocumentError> {
    let section_size = section_size.max(1);
    let items = parse(text);

    let mut sections: Vec<Vec<&Item>> = vec![Vec::new()];
    let mut blocks_in_section = 0;
    for item in &items {
        let current = sections.len() - 1;
        match item {
            Item::SectionBreak => {
                if !sections[current].is_empty() {
                    sections.push(Vec::new());
                    blocks_in_section = 0;
                }
            }
            _ => {
                if blocks_in_section == section_size {
                    sections.push(Vec::new());
                    blocks_in_section = 0;
                }
                let current = sections.len() - 1;
                sections[current].push(item);
                if !matches!(item, Item::PrintPage(_)) {
                    blocks_in_section += 1;
                }
            }
        }
    }
    sections.retain(|s| !s.is_empty());

    let mut doc = Document::new();
    let root = doc.root();
    if sections.len() <= 1 {
        for item in sections.into_iter().flatten() {
            append_item(&mut doc, root, item)?;
        }
    } else {
        for items in sections {
            let section = doc.append(root, NodeKind::Section)?;
            for item in items {
                append_item(&mut doc, section, item)?;
            }
        }
    }
    debug!("Imported {} item(s)", items.len());
    Ok(doc)
}

/// Read and import a plain-text file
pub fn load_document(path: &Path, section_size: usize) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    import_text(&text, section_size).with_context(|| format!("importing {}", path.display()))
}
