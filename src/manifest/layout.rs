//! Source-preserving rendering of a patched manifest
//!
//! serde_yaml re-emits a whole tree in its own style: comments are gone,
//! quotes are normalised and flow collections become block collections.
//! Bundle manifests are partly hand-written, so a patched tree is rendered
//! against the text it was loaded from instead. Block mapping entries and
//! block sequence items whose value did not change are copied verbatim;
//! changed ones are descended into when both sides are block collections,
//! and re-emitted by serde_yaml at the original indentation otherwise.
//!
//! The scanner only understands block layout. Anything else at a changed
//! node (flow collections, complex keys, multi-document streams) makes
//! [`render`] give up on that node and the caller re-emits it.

use serde_yaml::{Mapping, Value};

/// Render `patched` reusing the layout of `source`, which parsed to `original`
///
/// Returns `None` when the root itself cannot be laid out from the source.
pub(crate) fn render(source: &str, original: &Value, patched: &Value) -> Option<String> {
    let lines: Vec<String> = source.split_inclusive('\n').map(str::to_string).collect();
    render_block(&lines, original, patched)
}

/// One mapping entry or sequence item in the source
///
/// `start..body_end` holds the node itself; `body_end..end` holds the
/// blank and comment lines that follow it at the node's own indentation.
struct Entry {
    start: usize,
    body_end: usize,
    end: usize,
}

fn render_block(lines: &[String], old: &Value, new: &Value) -> Option<String> {
    if old == new {
        return Some(lines.concat());
    }
    let first = lines.iter().position(|l| !is_blank_or_comment(l))?;
    let indent = indent_of(&lines[first]);
    let text = &content(&lines[first])[indent..];

    match (old, new) {
        (Value::Mapping(old), Value::Mapping(new))
            if !is_sequence_item(text) && split_key(text).is_some() =>
        {
            render_mapping(lines, first, indent, old, new)
        }
        (Value::Sequence(old), Value::Sequence(new)) if is_sequence_item(text) => {
            render_sequence(lines, first, indent, old, new)
        }
        _ => None,
    }
}

fn render_mapping(
    lines: &[String],
    first: usize,
    indent: usize,
    old: &Mapping,
    new: &Mapping,
) -> Option<String> {
    if new.is_empty() {
        return None;
    }

    let mut entries = Vec::new();
    for entry in split_entries(lines, first, indent, |text| !is_sequence_item(text))? {
        let (key, _) = split_key(&content(&lines[entry.start])[indent..])?;
        let key: Value = serde_yaml::from_str(key).ok()?;
        entries.push((key, entry));
    }

    let mut out = lines[..first].concat();
    for (key, value) in new {
        let source = entries.iter().find(|(k, _)| k == key).map(|(_, e)| e);
        match (source, old.get(key)) {
            (Some(entry), Some(before)) => {
                let node = if before == value {
                    lines[entry.start..entry.body_end].concat()
                } else {
                    render_entry(lines, entry, indent, key, before, value)?
                };
                push_chunk(&mut out, &node);
                push_chunk(&mut out, &lines[entry.body_end..entry.end].concat());
            }
            _ => push_chunk(&mut out, &fresh_entry(key, value, indent)?),
        }
    }
    Some(out)
}

/// A changed mapping entry: keep the key line when the value is a nested
/// block on the following lines, re-emit the whole entry otherwise
fn render_entry(
    lines: &[String],
    entry: &Entry,
    indent: usize,
    key: &Value,
    before: &Value,
    value: &Value,
) -> Option<String> {
    let (_, rest) = split_key(&content(&lines[entry.start])[indent..])?;
    let rest = rest.trim();
    if rest.is_empty() || rest.starts_with('#') {
        let body = &lines[entry.start + 1..entry.body_end];
        if let Some(nested) = render_block(body, before, value) {
            return Some(format!("{}{}", lines[entry.start], nested));
        }
    }
    fresh_entry(key, value, indent)
}

fn render_sequence(
    lines: &[String],
    first: usize,
    indent: usize,
    old: &[Value],
    new: &[Value],
) -> Option<String> {
    // items pair up by position; added or removed items re-emit the sequence
    if old.len() != new.len() || new.is_empty() {
        return None;
    }
    let entries = split_entries(lines, first, indent, is_sequence_item)?;
    if entries.len() != old.len() {
        return None;
    }

    let mut out = lines[..first].concat();
    for ((entry, before), value) in entries.iter().zip(old).zip(new) {
        let node = if before == value {
            lines[entry.start..entry.body_end].concat()
        } else {
            render_item(&lines[entry.start..entry.body_end], indent, before, value)
                .or_else(|| fresh_item(value, indent))?
        };
        push_chunk(&mut out, &node);
        push_chunk(&mut out, &lines[entry.body_end..entry.end].concat());
    }
    Some(out)
}

/// Descend into a changed `- ` item by blanking its dash, rendering the
/// item body as a block of its own, then putting the dash back
fn render_item(item: &[String], indent: usize, before: &Value, value: &Value) -> Option<String> {
    let mut blanked = item.to_vec();
    blanked[0].replace_range(indent..indent + 1, " ");

    let mut body = render_block(&blanked, before, value)?;
    if body.as_bytes().get(indent) != Some(&b' ') {
        return None;
    }
    body.replace_range(indent..indent + 1, "-");
    Some(body)
}

/// Split a block collection at `indent` into its entries
///
/// Content lines at `indent` for which `is_start` holds open a new entry.
/// For mappings, `- ` lines at the same indentation are a block sequence
/// value of the previous key. Anything else at or left of `indent` is a
/// layout the scanner does not handle.
fn split_entries(
    lines: &[String],
    first: usize,
    indent: usize,
    is_start: impl Fn(&str) -> bool,
) -> Option<Vec<Entry>> {
    let mut starts = Vec::new();
    for (i, line) in lines.iter().enumerate().skip(first) {
        if is_blank_or_comment(line) {
            continue;
        }
        let at = indent_of(line);
        if at < indent {
            return None;
        }
        if at == indent {
            let text = &content(line)[indent..];
            if is_start(text) {
                starts.push(i);
            } else if !is_sequence_item(text) {
                return None;
            }
        }
    }

    let mut entries = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(lines.len());
        let mut body_end = end;
        while body_end > start + 1 && is_trailer(&lines[body_end - 1], indent) {
            body_end -= 1;
        }
        entries.push(Entry {
            start,
            body_end,
            end,
        });
    }
    Some(entries)
}

/// `key: value` emitted by serde_yaml and shifted to `indent`
fn fresh_entry(key: &Value, value: &Value, indent: usize) -> Option<String> {
    let mut single = Mapping::new();
    single.insert(key.clone(), value.clone());
    let text = serde_yaml::to_string(&single).ok()?;
    Some(shift(&text, indent, indent))
}

/// `- value` emitted by serde_yaml and shifted to `indent`
fn fresh_item(value: &Value, indent: usize) -> Option<String> {
    let text = serde_yaml::to_string(value).ok()?;
    let mut out = format!("{}- ", " ".repeat(indent));
    out.push_str(&shift(&text, 0, indent + 2));
    Some(out)
}

/// Indent the first line by `first` spaces and the others by `rest`
fn shift(text: &str, first: usize, rest: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if !line.is_empty() {
            out.push_str(&" ".repeat(if i == 0 { first } else { rest }));
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn push_chunk(out: &mut String, chunk: &str) {
    if chunk.is_empty() {
        return;
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(chunk);
}

fn content(line: &str) -> &str {
    line.trim_end_matches(&['\n', '\r'][..])
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_blank_or_comment(line: &str) -> bool {
    let text = content(line).trim_start();
    text.is_empty() || text.starts_with('#')
}

fn is_trailer(line: &str, indent: usize) -> bool {
    let text = content(line);
    text.trim().is_empty() || (text.trim_start().starts_with('#') && indent_of(text) <= indent)
}

fn is_sequence_item(text: &str) -> bool {
    text == "-" || text.starts_with("- ")
}

/// Split `key: rest` on the first key indicator, honouring quoted keys
fn split_key(text: &str) -> Option<(&str, &str)> {
    let quote = match text.chars().next()? {
        quote @ ('"' | '\'') => quote,
        '{' | '[' | '?' | '&' | '*' | '!' | '%' | '@' | '`' | '|' | '>' | '#' | '-' => {
            return None
        }
        _ => {
            let (colon, _) = text.match_indices(':').find(|(i, _)| {
                let after = &text[i + 1..];
                after.is_empty() || after.starts_with(' ')
            })?;
            return Some((text[..colon].trim_end(), &text[colon + 1..]));
        }
    };

    let end = closing_quote(text, quote)?;
    let rest = text[end..].trim_start().strip_prefix(':')?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((&text[..end], rest))
}

/// Byte offset just past the quote closing the scalar opened at offset 0
fn closing_quote(text: &str, quote: char) -> Option<usize> {
    let bytes = text.as_bytes();
    let q = quote as u8;
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote == '"' => i += 2,
            b if b == q && quote == '\'' && bytes.get(i + 1) == Some(&q) => i += 2,
            b if b == q => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}
