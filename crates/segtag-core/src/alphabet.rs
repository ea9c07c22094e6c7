//! # Alphabet
//!
//! Bidirectional string ⇄ id table backing every vocabulary of the model
//! (words, characters, discrete types, sparse features and labels).

use std::collections::HashMap;
use std::io::{BufRead, Write};

use crate::checkpoint::{CheckpointReader, CheckpointWriter};
use crate::error::{Result, SegtagError};

/// Entry that unknown strings fall back to when present.
pub const UNKNOWN_KEY: &str = "-unknown-";

/// Insertion-ordered string table. Ids are dense and start at zero.
#[derive(Debug, Clone, Default)]
pub struct Alphabet {
    entries: Vec<String>,
    ids: HashMap<String, u32>,
    frozen: bool,
}

impl PartialEq for Alphabet {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Alphabet {}

impl Alphabet {
    /// Create an empty, growable alphabet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an alphabet from entries in id order. Duplicates keep their first id.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut alphabet = Self::new();
        for entry in entries {
            alphabet.insert(entry);
        }
        alphabet
    }

    /// Insert a string and return its id. A frozen alphabet only returns existing ids.
    pub fn insert<S: Into<String>>(&mut self, key: S) -> Option<u32> {
        let key = key.into();
        if let Some(&id) = self.ids.get(&key) {
            return Some(id);
        }
        if self.frozen {
            return None;
        }
        let id = self.entries.len() as u32;
        self.ids.insert(key.clone(), id);
        self.entries.push(key);
        Some(id)
    }

    /// Stop accepting new entries.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Id of an exact entry.
    pub fn index_of(&self, key: &str) -> Option<u32> {
        self.ids.get(key).copied()
    }

    /// Id of an entry, falling back to [`UNKNOWN_KEY`].
    pub fn lookup(&self, key: &str, table: &str) -> Result<u32> {
        self.index_of(key)
            .or_else(|| self.index_of(UNKNOWN_KEY))
            .ok_or_else(|| SegtagError::UnknownKey {
                table: table.to_string(),
                key: key.to_string(),
            })
    }

    /// Entry for an id.
    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in id order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Write the alphabet as a checkpoint section.
    pub fn write<W: Write>(&self, writer: &mut CheckpointWriter<W>, section: &str) -> Result<()> {
        writer.strings(section, &self.entries)
    }

    /// Read an alphabet section. The loaded alphabet is frozen.
    pub fn read<R: BufRead>(reader: &mut CheckpointReader<R>, section: &str) -> Result<Self> {
        let entries = reader.strings(section)?;
        let mut alphabet = Self::from_entries(entries);
        alphabet.freeze();
        Ok(alphabet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointReader, CheckpointWriter};

    #[test]
    fn test_ids_follow_insertion_order() {
        let mut alphabet = Alphabet::new();
        assert_eq!(alphabet.insert("b"), Some(0));
        assert_eq!(alphabet.insert("m"), Some(1));
        assert_eq!(alphabet.insert("b"), Some(0));
        assert_eq!(alphabet.len(), 2);
        assert_eq!(alphabet.get(1), Some("m"));
        assert_eq!(alphabet.get(2), None);
    }

    #[test]
    fn test_frozen_alphabet_rejects_new_entries() {
        let mut alphabet = Alphabet::from_entries(["x"]);
        alphabet.freeze();
        assert_eq!(alphabet.insert("y"), None);
        assert_eq!(alphabet.insert("x"), Some(0));
    }

    #[test]
    fn test_lookup_falls_back_to_unknown() {
        let alphabet = Alphabet::from_entries([UNKNOWN_KEY, "中", "国"]);
        assert_eq!(alphabet.lookup("国", "chars").unwrap(), 2);
        assert_eq!(alphabet.lookup("人", "chars").unwrap(), 0);

        let strict = Alphabet::from_entries(["a"]);
        assert!(matches!(
            strict.lookup("b", "words"),
            Err(SegtagError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_checkpoint_roundtrip_preserves_ids() {
        let alphabet = Alphabet::from_entries([UNKNOWN_KEY, "上海", "浦东"]);
        let mut writer = CheckpointWriter::new(Vec::new());
        alphabet.write(&mut writer, "word-alphabet").unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = CheckpointReader::new(bytes.as_slice());
        let loaded = Alphabet::read(&mut reader, "word-alphabet").unwrap();
        assert_eq!(loaded.entries(), alphabet.entries());
        assert_eq!(loaded.index_of("浦东"), Some(2));
        assert!(loaded.is_frozen());
    }
}
