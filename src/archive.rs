//! Zipped archive input: newline-delimited JSON members.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use zip::ZipArchive;

pub struct Archive<R: Read + Seek> {
    zip: ZipArchive<R>,
}

impl Archive<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening archive {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("reading archive {}", path.display()))
    }
}

impl<R: Read + Seek> Archive<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        Ok(Self {
            zip: ZipArchive::new(reader)?,
        })
    }

    /// Member names in reverse-lexicographic order. Newer members tend to
    /// sort last, and loading them first means later members mostly hit
    /// already-present user rows instead of racing to create them.
    pub fn member_names(&self) -> Vec<String> {
        self.zip
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_owned)
            .sorted()
            .rev()
            .collect()
    }

    /// Buffered line reader over one member's decompressed bytes.
    pub fn member_reader(&mut self, name: &str) -> Result<impl BufRead + '_> {
        let file = self
            .zip
            .by_name(name)
            .with_context(|| format!("opening archive member {name}"))?;
        Ok(BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn sample() -> Archive<Cursor<Vec<u8>>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("part-a.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"{\"n\":1}\n{\"n\":2}\n").unwrap();
        writer
            .start_file("part-b.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"{\"n\":3}\n").unwrap();
        let cursor = writer.finish().unwrap();
        Archive::from_reader(cursor).unwrap()
    }

    #[test]
    fn members_come_reverse_sorted() {
        assert_eq!(
            sample().member_names(),
            vec!["part-b.json".to_owned(), "part-a.json".to_owned()]
        );
    }

    #[test]
    fn members_read_line_by_line() {
        let mut archive = sample();
        let lines: Vec<String> = archive
            .member_reader("part-a.json")
            .unwrap()
            .lines()
            .map(|line| line.unwrap())
            .collect();
        assert_eq!(lines, vec!["{\"n\":1}", "{\"n\":2}"]);
    }
}
