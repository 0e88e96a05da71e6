//
// container.rs
// Dicom-Anonymizer-rs
//
// Key-path to typed-value contract over a metadata container; scanning and scrubbing only talk to this trait.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;

use dicom_core::Tag;
use dicom_core::VR;

use crate::error::ContainerError;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathEntry {
    Element(Tag),
    Item(usize),
}

/// Location of a single element inside a container, descending through
/// sequence items. Rendered as `00100010` or `00081110/[0]/00081155`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<PathEntry>);

impl FieldPath {
    /// Path to a top-level element.
    pub fn root(tag: Tag) -> Self {
        Self(vec![PathEntry::Element(tag)])
    }

    /// Path to element `tag` inside item `index` of the sequence at `self`.
    pub fn child(&self, index: usize, tag: Tag) -> Self {
        let mut entries = self.0.clone();
        entries.push(PathEntry::Item(index));
        entries.push(PathEntry::Element(tag));
        Self(entries)
    }

    pub fn entries(&self) -> &[PathEntry] {
        &self.0
    }

    /// Tag of the element the path ends on.
    pub fn final_tag(&self) -> Option<Tag> {
        match self.0.last() {
            Some(PathEntry::Element(tag)) => Some(*tag),
            _ => None,
        }
    }

    /// Whether any element along the path is private (odd group).
    pub fn is_private(&self) -> bool {
        self.0.iter().any(|entry| match entry {
            PathEntry::Element(tag) => tag.group() % 2 == 1,
            PathEntry::Item(_) => false,
        })
    }

    pub fn depth(&self) -> usize {
        self.0
            .iter()
            .filter(|entry| matches!(entry, PathEntry::Item(_)))
            .count()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.0 {
            if !first {
                f.write_str("/")?;
            }
            first = false;
            match entry {
                PathEntry::Element(tag) => write!(f, "{:04X}{:04X}", tag.group(), tag.element())?,
                PathEntry::Item(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Value of a field as seen by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Character data, one entry per value multiplicity.
    Text(Vec<String>),
    /// Opaque bytes (OB/UN) that may carry embedded text.
    Bytes(Vec<u8>),
}

/// A leaf element together with its path and encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub path: FieldPath,
    pub vr: VR,
    pub value: FieldValue,
}

/// Read/write key-path store for one imaging file.
///
/// `fields` must enumerate every textual or byte-text leaf, including those
/// nested in sequences and private elements. Pixel payloads and numeric
/// binary elements are not part of the enumeration and are never touched.
pub trait MetadataContainer {
    fn fields(&self) -> Vec<Field>;

    fn read(&self, path: &FieldPath) -> Option<FieldValue> {
        self.fields()
            .into_iter()
            .find(|field| &field.path == path)
            .map(|field| field.value)
    }

    /// Replace the value at an existing path, keeping its encoding.
    fn write(&mut self, path: &FieldPath, value: FieldValue) -> Result<(), ContainerError>;

    /// Remove the element at `path`; returns whether it existed.
    fn remove(&mut self, path: &FieldPath) -> bool;

    /// Create or overwrite a top-level text element.
    fn put_text(&mut self, tag: Tag, vr: VR, value: &str);

    /// Whether a top-level element exists.
    fn contains(&self, tag: Tag) -> bool;

    /// Drop every private element; returns how many were removed.
    fn remove_private(&mut self) -> usize;
}

#[cfg(test)]
pub(crate) mod memory {
    //! Flat key-path store used by unit tests.

    use std::collections::BTreeMap;

    use super::*;

    #[derive(Debug, Clone, Default)]
    pub struct MemoryContainer {
        pub entries: BTreeMap<FieldPath, (VR, FieldValue)>,
        /// Paths whose writes are silently dropped.
        pub frozen: Vec<FieldPath>,
    }

    impl MemoryContainer {
        pub fn with_text(mut self, path: FieldPath, vr: VR, value: &str) -> Self {
            self.entries
                .insert(path, (vr, FieldValue::Text(vec![value.to_string()])));
            self
        }

        pub fn with_bytes(mut self, path: FieldPath, vr: VR, value: &[u8]) -> Self {
            self.entries
                .insert(path, (vr, FieldValue::Bytes(value.to_vec())));
            self
        }

        pub fn text(&self, path: &FieldPath) -> Option<String> {
            match self.entries.get(path) {
                Some((_, FieldValue::Text(values))) => Some(values.join("\\")),
                _ => None,
            }
        }
    }

    impl MetadataContainer for MemoryContainer {
        fn fields(&self) -> Vec<Field> {
            self.entries
                .iter()
                .map(|(path, (vr, value))| Field {
                    path: path.clone(),
                    vr: *vr,
                    value: value.clone(),
                })
                .collect()
        }

        fn write(&mut self, path: &FieldPath, value: FieldValue) -> Result<(), ContainerError> {
            if self.frozen.contains(path) {
                return Ok(());
            }
            match self.entries.get_mut(path) {
                Some(entry) => {
                    entry.1 = value;
                    Ok(())
                }
                None => Err(ContainerError::MissingField(path.clone())),
            }
        }

        fn remove(&mut self, path: &FieldPath) -> bool {
            self.entries.remove(path).is_some()
        }

        fn put_text(&mut self, tag: Tag, vr: VR, value: &str) {
            self.entries.insert(
                FieldPath::root(tag),
                (vr, FieldValue::Text(vec![value.to_string()])),
            );
        }

        fn contains(&self, tag: Tag) -> bool {
            self.entries.contains_key(&FieldPath::root(tag))
        }

        fn remove_private(&mut self) -> usize {
            let before = self.entries.len();
            self.entries.retain(|path, _| !path.is_private());
            before - self.entries.len()
        }
    }
}
