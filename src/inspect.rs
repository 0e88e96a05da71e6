//
// inspect.rs
// Dicom-Anonymizer-rs
//
// Lists the fields of one DICOM file that hold a given name, with dictionary aliases, for manual remediation.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use dicom_core::dictionary::DataDictionary;
use dicom_core::Tag;
use dicom_dictionary_std::StandardDataDictionary;
use dicom_object::open_file;

use crate::container::{FieldPath, FieldValue, MetadataContainer, PathEntry};
use crate::scanner::NameVariants;

/// One field in which the name was found.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectHit {
    pub path: FieldPath,
    /// Dictionary aliases along the path, e.g. `ReferencedStudySequence/[0]/ReferencedSOPInstanceUID`.
    pub label: String,
    pub vr: String,
    pub preview: String,
}

pub fn inspect_container<C: MetadataContainer + ?Sized>(
    container: &C,
    variants: &NameVariants,
    max_value_len: usize,
) -> Vec<InspectHit> {
    container
        .fields()
        .into_iter()
        .filter(|field| variants.occurs_in(&field.value))
        .map(|field| InspectHit {
            label: path_label(&field.path),
            vr: format!("{}", field.vr),
            preview: preview_value(&field.value, max_value_len),
            path: field.path,
        })
        .collect()
}

pub fn inspect_file(
    path: &Path,
    names: &[String],
    min_token_len: usize,
    max_value_len: usize,
) -> Result<Vec<InspectHit>> {
    let obj = open_file(path).context("Failed to open DICOM file")?;
    let variants = NameVariants::new(names, min_token_len);
    Ok(inspect_container(&obj, &variants, max_value_len))
}

pub fn render_hits(hits: &[InspectHit]) -> String {
    let mut out = String::new();
    if hits.is_empty() {
        out.push_str("no field holds the name\n");
        return out;
    }
    for hit in hits {
        let _ = writeln!(out, "{} {} {} {}", hit.path, hit.label, hit.vr, hit.preview);
    }
    out
}

fn preview_value(value: &FieldValue, max_value_len: usize) -> String {
    match value {
        FieldValue::Text(values) => truncate(&values.join("\\"), max_value_len),
        FieldValue::Bytes(bytes) => {
            let printable: String = bytes
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            format!("{} bytes: {}", bytes.len(), truncate(&printable, max_value_len))
        }
    }
}

fn truncate(input: &str, limit: usize) -> String {
    if input.chars().count() <= limit {
        input.to_string()
    } else {
        let mut truncated: String = input.chars().take(limit).collect();
        truncated.push('…');
        truncated
    }
}

fn path_label(path: &FieldPath) -> String {
    path.entries()
        .iter()
        .map(|entry| match entry {
            PathEntry::Element(tag) => tag_name(*tag),
            PathEntry::Item(index) => format!("[{}]", index),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn tag_name(tag: Tag) -> String {
    if tag.group() % 2 == 1 {
        return format!("Private({:04X},{:04X})", tag.group(), tag.element());
    }
    StandardDataDictionary
        .by_tag(tag)
        .map(|e| e.alias.to_string())
        .unwrap_or_else(|| "UnknownTag".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::memory::MemoryContainer;
    use dicom_core::VR;

    #[test]
    fn lists_hidden_name_fields_with_aliases() {
        let nested = FieldPath::root(Tag(0x0008, 0x1110)).child(0, Tag(0x0008, 0x1030));
        let container = MemoryContainer::default()
            .with_text(FieldPath::root(Tag(0x0010, 0x0010)), VR::PN, "DOE^JOHN")
            .with_text(nested, VR::LO, "Brain for John Doe")
            .with_bytes(FieldPath::root(Tag(0x0029, 0x1020)), VR::UN, b"\x00DOE JOHN")
            .with_text(FieldPath::root(Tag(0x0008, 0x0060)), VR::CS, "MR");
        let hits = inspect_container(&container, &NameVariants::new(&["John Doe"], 3), 8);

        let labels: Vec<&str> = hits.iter().map(|h| h.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "ReferencedStudySequence/[0]/StudyDescription",
                "PatientName",
                "Private(0029,1020)",
            ]
        );
        assert_eq!(hits[0].preview, "Brain fo…");
        assert!(hits[2].preview.starts_with("9 bytes: .DOE JOH"));
        assert!(render_hits(&hits).contains("00100010 PatientName PN DOE^JOHN"));
    }

    #[test]
    fn clean_file_reports_nothing() {
        assert_eq!(render_hits(&[]), "no field holds the name\n");
    }
}
