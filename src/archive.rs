//! Test archives
//!
//! An `Archive` is the pre-parsed input of one test: the script text plus
//! an ordered list of files to seed the sandbox with. Archives are read
//! from txtar files through `emx-txtar`; golden updates are written back
//! in txtar form.

use std::collections::BTreeMap;

/// One file section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub name: String,
    pub data: Vec<u8>,
    /// Extract with mode 0755 instead of 0644 (Unix only)
    pub executable: bool,
}

/// Script text plus file sections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    /// The script, i.e. the txtar comment section
    pub comment: String,
    pub files: Vec<ArchiveFile>,
}

impl Archive {
    /// Parse txtar text.
    pub fn parse(text: &str) -> Result<Self, String> {
        let parsed = emx_txtar::Decoder::new().decode(text).map_err(|e| e.to_string())?;
        let files = parsed.files.iter()
            .map(|f| {
                let data: Vec<u8> = f.data.clone().into();
                ArchiveFile { name: f.name.to_string(), data, executable: false }
            })
            .collect();
        Ok(Self { comment: parsed.comment.to_string(), files })
    }

    /// Render as txtar text. Every non-empty section ends with a newline.
    pub fn format(&self) -> String {
        let mut out = String::new();
        push_section(&mut out, self.comment.as_bytes());
        for file in &self.files {
            out.push_str(&format!("-- {} --\n", file.name));
            push_section(&mut out, &file.data);
        }
        out
    }

    /// Replace the contents of the named sections. Returns how many were
    /// actually changed.
    pub fn apply_updates(&mut self, updates: &BTreeMap<String, String>) -> usize {
        let mut changed = 0;
        for file in &mut self.files {
            if let Some(content) = updates.get(&file.name) {
                if file.data != content.as_bytes() {
                    file.data = content.as_bytes().to_vec();
                    changed += 1;
                }
            }
        }
        changed
    }
}

fn push_section(out: &mut String, data: &[u8]) {
    let text = String::from_utf8_lossy(data);
    out.push_str(&text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

/// Strip txtar quoting: the leading `>` of every line is removed. Lines
/// without one are kept as they are.
pub fn unquote(data: &[u8]) -> Result<Vec<u8>, String> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.last() != Some(&b'\n') {
        return Err("data does not appear to be quoted".to_string());
    }
    let mut out = Vec::with_capacity(data.len());
    for line in data.split_inclusive(|&b| b == b'\n') {
        out.extend_from_slice(line.strip_prefix(b">").unwrap_or(line));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Archive {
        Archive {
            comment: "exec tool\ncmp stdout want.txt\n".into(),
            files: vec![
                ArchiveFile { name: "want.txt".into(), data: b"old".to_vec(), executable: false },
                ArchiveFile { name: "other.txt".into(), data: b"keep\n".to_vec(), executable: false },
            ],
        }
    }

    #[test]
    fn format_adds_missing_newlines() {
        assert_eq!(
            sample().format(),
            "exec tool\ncmp stdout want.txt\n-- want.txt --\nold\n-- other.txt --\nkeep\n",
        );
    }

    #[test]
    fn apply_updates_only_touches_named_sections() {
        let mut archive = sample();
        let mut updates = BTreeMap::new();
        updates.insert("want.txt".to_string(), "new\n".to_string());
        updates.insert("missing.txt".to_string(), "x".to_string());
        assert_eq!(archive.apply_updates(&updates), 1);
        assert_eq!(archive.files[0].data, b"new\n");
        assert_eq!(archive.files[1].data, b"keep\n");
        assert_eq!(archive.apply_updates(&updates), 0);
    }

    #[test]
    fn unquote_strips_markers() {
        assert_eq!(unquote(b">-- a --\n>hello\n").unwrap(), b"-- a --\nhello\n");
        assert_eq!(unquote(b">ok\nplain\n").unwrap(), b"ok\nplain\n");
        assert!(unquote(b"").unwrap().is_empty());
    }

    #[test]
    fn unquote_requires_trailing_newline() {
        assert!(unquote(b">no newline").is_err());
    }
}
