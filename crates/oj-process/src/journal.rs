//! Tagged, append-only capture of child output with random-access
//! readback. One journal wraps one backing file; a tag names the byte
//! range written while it was active.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::warn;

struct ActiveTag {
    tag: String,
    offset_start: u64,
    length: u64,
}

/// Append-only backing file plus a tag table mapping tag to
/// `(offset, length)`.
pub struct Journal {
    file: File,
    offset: u64,
    tag_map: HashMap<String, (u64, u64)>,
    tag_order: Vec<String>,
    active: Option<ActiveTag>,
}

impl Journal {
    /// Wrap an already-open backing file, appending from its current
    /// position.
    pub fn new(mut file: File) -> Result<Self> {
        let offset = file
            .stream_position()
            .context("failed to query journal file position")?;
        Ok(Self {
            file,
            offset,
            tag_map: HashMap::new(),
            tag_order: Vec::new(),
            active: None,
        })
    }

    /// Create (or truncate) a backing file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create journal file {}", path.display()))?;
        Self::new(file)
    }

    /// Begin capturing under `tag`. Tags are unique for the lifetime of
    /// the journal and only one may be active at a time.
    pub fn start(&mut self, tag: &str) -> Result<()> {
        if let Some(active) = &self.active {
            bail!(
                "journal tag '{}' is still active; end it before starting '{tag}'",
                active.tag
            );
        }
        if self.tag_map.contains_key(tag) {
            bail!("journal tag '{tag}' was already recorded");
        }
        self.active = Some(ActiveTag {
            tag: tag.to_string(),
            offset_start: self.offset,
            length: 0,
        });
        Ok(())
    }

    /// Close the active tag, recording its `(offset, length)` range.
    pub fn end(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            bail!("no active journal tag to end");
        };
        self.tag_map
            .insert(active.tag.clone(), (active.offset_start, active.length));
        self.tag_order.push(active.tag);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Read back the bytes recorded under `tag`, restoring the append
    /// position afterwards.
    pub fn dump(&mut self, tag: &str) -> Result<Vec<u8>> {
        let &(offset, length) = self
            .tag_map
            .get(tag)
            .with_context(|| format!("undefined journal tag '{tag}'"))?;
        let mut buf = vec![0u8; length as usize];
        self.file
            .seek(SeekFrom::Start(offset))
            .context("failed to seek to journal tag")?;
        self.file
            .read_exact(&mut buf)
            .with_context(|| format!("failed to read {length} byte(s) for tag '{tag}'"))?;
        self.file
            .seek(SeekFrom::Start(self.offset))
            .context("failed to restore journal position")?;
        Ok(buf)
    }

    /// Every `(tag, bytes)` pair in recording order.
    pub fn dump_all(&mut self) -> Result<Vec<(String, Vec<u8>)>> {
        let tags = self.tag_order.clone();
        let mut out = Vec::with_capacity(tags.len());
        for tag in tags {
            let buf = self.dump(&tag)?;
            out.push((tag, buf));
        }
        Ok(out)
    }
}

/// A journal is a valid runner sink: it has no intrinsic byte limit (the
/// cap, if any, comes from the sink record around it).
impl Write for Journal {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.offset += n as u64;
        if let Some(active) = &mut self.active {
            active.length += n as u64;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Two journals, one per stream, driven under a single session tag.
pub struct Journals {
    stdout: Journal,
    stderr: Journal,
}

impl Journals {
    pub fn new(stdout: Journal, stderr: Journal) -> Self {
        Self { stdout, stderr }
    }

    pub fn stdout(&mut self) -> &mut Journal {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut Journal {
        &mut self.stderr
    }

    /// Start `tag` on both journals. The returned guard ends both on all
    /// exit paths, including early returns and panics.
    pub fn session(&mut self, tag: &str) -> Result<JournalSession<'_>> {
        self.stdout.start(tag)?;
        if let Err(err) = self.stderr.start(tag) {
            let _ = self.stdout.end();
            return Err(err);
        }
        Ok(JournalSession { journals: self })
    }

    fn end_active(&mut self) {
        for journal in [&mut self.stdout, &mut self.stderr] {
            if journal.is_active()
                && let Err(err) = journal.end()
            {
                warn!("failed to end journal tag: {err:#}");
            }
        }
    }
}

/// Scope guard for one [`Journals::session`].
pub struct JournalSession<'a> {
    journals: &'a mut Journals,
}

impl JournalSession<'_> {
    /// Both journals, for use as the runner's stdout/stderr sinks.
    pub fn sinks(&mut self) -> (&mut Journal, &mut Journal) {
        (&mut self.journals.stdout, &mut self.journals.stderr)
    }
}

impl Drop for JournalSession<'_> {
    fn drop(&mut self) {
        self.journals.end_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_journal() -> Journal {
        Journal::new(tempfile::tempfile().unwrap()).unwrap()
    }

    #[test]
    fn test_journal_roundtrip() {
        let mut journal = scratch_journal();
        journal.start("COMPILE").unwrap();
        journal.write_all(b"warning: unused variable\n").unwrap();
        journal.write_all(b"done\n").unwrap();
        journal.end().unwrap();

        assert_eq!(journal.dump("COMPILE").unwrap(), b"warning: unused variable\ndone\n");
    }

    #[test]
    fn test_journal_multiple_tags_random_access() {
        let mut journal = scratch_journal();
        for (tag, content) in [("a", "first"), ("b", ""), ("c", "third")] {
            journal.start(tag).unwrap();
            journal.write_all(content.as_bytes()).unwrap();
            journal.end().unwrap();
        }

        assert_eq!(journal.dump("c").unwrap(), b"third");
        assert_eq!(journal.dump("a").unwrap(), b"first");
        assert_eq!(journal.dump("b").unwrap(), b"");
    }

    #[test]
    fn test_journal_dump_preserves_append_position() {
        let mut journal = scratch_journal();
        journal.start("a").unwrap();
        journal.write_all(b"aaa").unwrap();
        journal.end().unwrap();

        let _ = journal.dump("a").unwrap();

        journal.start("b").unwrap();
        journal.write_all(b"bbb").unwrap();
        journal.end().unwrap();
        assert_eq!(journal.dump("b").unwrap(), b"bbb");
        assert_eq!(journal.dump("a").unwrap(), b"aaa");
    }

    #[test]
    fn test_journal_rejects_nested_start() {
        let mut journal = scratch_journal();
        journal.start("a").unwrap();
        let err = journal.start("b").unwrap_err();
        assert!(err.to_string().contains("still active"));
    }

    #[test]
    fn test_journal_rejects_tag_reuse() {
        let mut journal = scratch_journal();
        journal.start("a").unwrap();
        journal.end().unwrap();
        let err = journal.start("a").unwrap_err();
        assert!(err.to_string().contains("already recorded"));
    }

    #[test]
    fn test_journal_end_without_start() {
        let mut journal = scratch_journal();
        assert!(journal.end().is_err());
    }

    #[test]
    fn test_journal_dump_unknown_tag() {
        let mut journal = scratch_journal();
        let err = journal.dump("nope").unwrap_err();
        assert!(err.to_string().contains("undefined journal tag"));
    }

    #[test]
    fn test_journal_dump_all_in_order() {
        let mut journal = scratch_journal();
        for tag in ["z", "m", "a"] {
            journal.start(tag).unwrap();
            journal.write_all(tag.as_bytes()).unwrap();
            journal.end().unwrap();
        }
        let all = journal.dump_all().unwrap();
        let tags: Vec<_> = all.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, vec!["z", "m", "a"]);
    }

    #[test]
    fn test_session_ends_both_on_drop() {
        let mut journals = Journals::new(scratch_journal(), scratch_journal());
        {
            let mut session = journals.session("COMPILE").unwrap();
            let (j1, j2) = session.sinks();
            j1.write_all(b"out").unwrap();
            j2.write_all(b"err").unwrap();
        }
        assert_eq!(journals.stdout().dump("COMPILE").unwrap(), b"out");
        assert_eq!(journals.stderr().dump("COMPILE").unwrap(), b"err");

        // Both journals are reusable for the next tag.
        let session = journals.session("RUN-1").unwrap();
        drop(session);
        assert_eq!(journals.stdout().dump("RUN-1").unwrap(), b"");
    }

    #[test]
    fn test_session_duplicate_tag_leaves_journals_usable() {
        let mut journals = Journals::new(scratch_journal(), scratch_journal());
        drop(journals.session("a").unwrap());
        assert!(journals.session("a").is_err());
        drop(journals.session("b").unwrap());
        assert_eq!(journals.stdout().dump("b").unwrap(), b"");
    }
}
