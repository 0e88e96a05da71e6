//
// scrub.rs
// Dicom-Anonymizer-rs
//
// Removes name occurrences from flagged fields, clears auxiliary personal fields and verifies with a second scan.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeSet;

use dicom_core::{Tag, VR};
use dicom_dictionary_std::tags;
use serde::Serialize;
use tracing::{debug, warn};

use crate::container::{FieldPath, FieldValue, MetadataContainer};
use crate::error::{AnonymizeError, Result};
use crate::models::CsvColumns;
use crate::scanner::{scan, NameVariants};

/// Vendor-private element some scanners use as a second patient name.
pub const VENDOR_PATIENT_NAME: Tag = Tag(0x0033, 0x1013);

/// Personal fields cleared from every file regardless of name matching.
pub const AUXILIARY_FIELDS: [Tag; 11] = [
    Tag(0x0010, 0x1040), // PatientAddress
    Tag(0x0010, 0x0032), // PatientBirthTime
    Tag(0x0010, 0x2154), // PatientTelephoneNumbers
    Tag(0x0010, 0x1001), // OtherPatientNames
    Tag(0x0010, 0x1000), // OtherPatientIDs
    Tag(0x0010, 0x1060), // PatientMotherBirthName
    Tag(0x0008, 0x0092), // ReferringPhysicianAddress
    Tag(0x0008, 0x0094), // ReferringPhysicianTelephoneNumbers
    Tag(0x0008, 0x0081), // InstitutionAddress
    Tag(0x0040, 0x1102), // PersonAddress
    Tag(0x0040, 0x1103), // PersonTelephoneNumbers
];

// Removing one hit can join two fragments into a new one.
const MAX_PASSES: usize = 4;

/// Outcome for one flagged field of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrubRecord {
    pub session_id: String,
    pub file: String,
    pub field_path: String,
    pub original_substring_removed: bool,
    pub verified_clean: bool,
}

impl CsvColumns for ScrubRecord {
    const COLUMNS: &'static [&'static str] = &[
        "session_id",
        "file",
        "field_path",
        "original_substring_removed",
        "verified_clean",
    ];
}

/// What to do to every file besides name removal.
#[derive(Debug, Clone)]
pub struct ScrubPlan {
    pub clear_fields: Vec<Tag>,
    pub remove_private: bool,
}

impl Default for ScrubPlan {
    fn default() -> Self {
        Self {
            clear_fields: AUXILIARY_FIELDS.to_vec(),
            remove_private: false,
        }
    }
}

impl ScrubPlan {
    pub fn with_extra_fields(mut self, extra: impl IntoIterator<Item = Tag>) -> Self {
        for tag in extra {
            if !self.clear_fields.contains(&tag) {
                self.clear_fields.push(tag);
            }
        }
        self
    }
}

fn remove_ranges(raw: &str, ranges: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0;
    for &(start, end) in ranges {
        out.push_str(&raw[cursor..start]);
        cursor = end;
    }
    out.push_str(&raw[cursor..]);
    out
}

/// Strip every occurrence from a text value, leaving the surrounding text intact.
pub fn scrub_text(raw: &str, variants: &NameVariants) -> String {
    let mut current = raw.to_string();
    for _ in 0..MAX_PASSES {
        let hits = variants.find_in_text(&current);
        if hits.is_empty() {
            break;
        }
        current = remove_ranges(&current, &hits);
    }
    current
}

/// Blank every occurrence in a byte value with spaces, keeping its length and offsets.
pub fn scrub_bytes(raw: &[u8], variants: &NameVariants) -> Vec<u8> {
    let mut out = raw.to_vec();
    for (start, end) in variants.find_in_bytes(raw) {
        out[start..end].fill(b' ');
    }
    out
}

pub fn scrub_value(value: &FieldValue, variants: &NameVariants) -> FieldValue {
    match value {
        FieldValue::Text(values) => {
            FieldValue::Text(values.iter().map(|v| scrub_text(v, variants)).collect())
        }
        FieldValue::Bytes(bytes) => FieldValue::Bytes(scrub_bytes(bytes, variants)),
    }
}

/// Rewrite the flagged fields in place. Returns, per path, whether its value changed.
pub fn scrub<C: MetadataContainer + ?Sized>(
    container: &mut C,
    field_paths: &[FieldPath],
    variants: &NameVariants,
) -> Result<Vec<(FieldPath, bool)>> {
    let mut results = Vec::with_capacity(field_paths.len());
    for path in field_paths {
        let Some(original) = container.read(path) else {
            results.push((path.clone(), false));
            continue;
        };
        let cleaned = scrub_value(&original, variants);
        let changed = cleaned != original;
        if changed {
            container.write(path, cleaned)?;
        }
        results.push((path.clone(), changed));
    }
    Ok(results)
}

/// Remove the auxiliary personal fields wherever they occur. Returns how many went.
pub fn clear_auxiliary_fields<C: MetadataContainer + ?Sized>(container: &mut C, fields: &[Tag]) -> usize {
    let mut cleared = 0;
    for tag in fields {
        if container.remove(&FieldPath::root(*tag)) {
            cleared += 1;
        }
    }
    let nested: Vec<FieldPath> = container
        .fields()
        .into_iter()
        .map(|field| field.path)
        .filter(|path| path.depth() > 0 && path.final_tag().map_or(false, |t| fields.contains(&t)))
        .collect();
    for path in &nested {
        if container.remove(path) {
            cleared += 1;
        }
    }
    cleared
}

/// Overwrite the identity elements with the anonymized id.
pub fn stamp_identity<C: MetadataContainer + ?Sized>(container: &mut C, anon_id: &str) {
    container.put_text(tags::PATIENT_NAME, VR::PN, anon_id);
    container.put_text(tags::PATIENT_ID, VR::LO, anon_id);
    if container.contains(VENDOR_PATIENT_NAME) {
        container.put_text(VENDOR_PATIENT_NAME, VR::LO, anon_id);
    }
}

/// Re-scan after scrubbing; any path returned is a residual identity.
pub fn verify<C: MetadataContainer + ?Sized>(container: &C, variants: &NameVariants) -> Vec<FieldPath> {
    scan(container, variants)
}

/// Full treatment of one file: clear, scan, scrub, stamp, verify.
///
/// Fails with [`AnonymizeError::ResidualIdentity`] naming the first field
/// that still holds a name after the rewrite; the caller must then withhold
/// the whole session.
pub fn scrub_container<C: MetadataContainer + ?Sized>(
    session_id: &str,
    file: &str,
    container: &mut C,
    variants: &NameVariants,
    anon_id: &str,
    plan: &ScrubPlan,
) -> Result<Vec<ScrubRecord>> {
    let cleared = clear_auxiliary_fields(container, &plan.clear_fields);
    if plan.remove_private {
        let removed = container.remove_private();
        debug!(session_id, file, removed, "removed private elements");
    }

    let flagged = scan(container, variants);
    let rewritten = scrub(container, &flagged, variants)?;
    stamp_identity(container, anon_id);

    let residual: BTreeSet<FieldPath> = verify(container, variants).into_iter().collect();
    debug!(
        session_id,
        file,
        cleared,
        flagged = flagged.len(),
        residual = residual.len(),
        "scrubbed container"
    );

    let records: Vec<ScrubRecord> = rewritten
        .into_iter()
        .map(|(path, removed)| ScrubRecord {
            session_id: session_id.to_string(),
            file: file.to_string(),
            verified_clean: !residual.contains(&path),
            field_path: path.to_string(),
            original_substring_removed: removed,
        })
        .collect();

    if let Some(path) = residual.into_iter().next() {
        warn!(session_id, file, field = %path, "name still present after scrub");
        return Err(AnonymizeError::ResidualIdentity {
            session_id: session_id.to_string(),
            file: file.to_string(),
            field_path: path,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::memory::MemoryContainer;

    fn john_doe() -> NameVariants {
        NameVariants::new(&["DOE^JOHN"], 3)
    }

    #[test]
    fn keeps_technical_payload_around_the_name() {
        let cleaned = scrub_text("PatientID:DOE^JOHN;Protocol:T1_MPRAGE", &john_doe());
        assert_eq!(cleaned, "PatientID:;Protocol:T1_MPRAGE");
    }

    #[test]
    fn removes_each_occurrence_and_partial_names() {
        let cleaned = scrub_text("john doe / Doe follow-up, T2 FLAIR", &john_doe());
        assert_eq!(cleaned, " /  follow-up, T2 FLAIR");
    }

    #[test]
    fn byte_values_keep_their_length() {
        let raw = b"\x01\x02CSA DOE^JOHN\x00\x00".to_vec();
        let cleaned = scrub_bytes(&raw, &john_doe());
        assert_eq!(cleaned.len(), raw.len());
        assert_eq!(&cleaned[..6], &raw[..6]);
        assert_eq!(&cleaned[6..14], b"        ");
    }

    #[test]
    fn utf8_name_in_private_blob_is_blanked_and_verified() {
        let variants = NameVariants::new(&["José Pérez"], 3);
        let blob = FieldPath::root(Tag(0x0029, 0x1010));
        let raw = "CSA José^Pérez ".as_bytes().to_vec();
        let mut container = MemoryContainer::default()
            .with_text(FieldPath::root(tags::PATIENT_NAME), VR::PN, "Pérez^José")
            .with_bytes(blob.clone(), VR::OB, &raw);

        let records =
            scrub_container("S01", "a.dcm", &mut container, &variants, "subj_1", &ScrubPlan::default())
                .expect("scrub");
        assert!(records.iter().any(|r| r.field_path == blob.to_string() && r.verified_clean));
        assert!(verify(&container, &variants).is_empty());
        match container.read(&blob) {
            Some(FieldValue::Bytes(bytes)) => {
                assert_eq!(bytes.len(), raw.len());
                assert!(bytes.starts_with(b"CSA "));
                assert!(bytes.is_ascii());
            }
            other => panic!("unexpected blob value: {other:?}"),
        }
    }

    fn sample_container() -> MemoryContainer {
        MemoryContainer::default()
            .with_text(FieldPath::root(tags::PATIENT_NAME), VR::PN, "DOE^JOHN")
            .with_text(FieldPath::root(tags::PATIENT_ID), VR::LO, "12345")
            .with_text(
                FieldPath::root(tags::PROTOCOL_NAME),
                VR::LO,
                "PatientID:DOE^JOHN;Protocol:T1_MPRAGE",
            )
            .with_text(FieldPath::root(tags::PATIENT_ADDRESS), VR::LO, "1 Main St")
            .with_text(FieldPath::root(tags::PATIENT_SEX), VR::CS, "M")
            .with_text(FieldPath::root(tags::PATIENT_BIRTH_DATE), VR::DA, "19700101")
    }

    #[test]
    fn scrubbed_container_verifies_clean() {
        let mut container = sample_container();
        let records = scrub_container(
            "S01",
            "a.dcm",
            &mut container,
            &john_doe(),
            "subj_0001",
            &ScrubPlan::default(),
        )
        .expect("scrub");

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.verified_clean && r.original_substring_removed));
        assert!(verify(&container, &john_doe()).is_empty());
        assert_eq!(
            container.text(&FieldPath::root(tags::PROTOCOL_NAME)).as_deref(),
            Some("PatientID:;Protocol:T1_MPRAGE")
        );
        assert_eq!(
            container.text(&FieldPath::root(tags::PATIENT_NAME)).as_deref(),
            Some("subj_0001")
        );
        assert!(!container.contains(tags::PATIENT_ADDRESS));
        // Covariates are untouched.
        assert_eq!(
            container.text(&FieldPath::root(tags::PATIENT_BIRTH_DATE)).as_deref(),
            Some("19700101")
        );
    }

    #[test]
    fn unwritable_field_raises_residual_identity() {
        let stuck = FieldPath::root(tags::PROTOCOL_NAME);
        let mut container = sample_container();
        container.frozen.push(stuck.clone());

        let err = scrub_container(
            "S01",
            "a.dcm",
            &mut container,
            &john_doe(),
            "subj_0001",
            &ScrubPlan::default(),
        )
        .unwrap_err();
        match err {
            AnonymizeError::ResidualIdentity { field_path, .. } => assert_eq!(field_path, stuck),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn nested_auxiliary_fields_are_cleared() {
        let nested = FieldPath::root(Tag(0x0040, 0x0275)).child(0, tags::PERSON_ADDRESS);
        let mut container = MemoryContainer::default()
            .with_text(nested.clone(), VR::ST, "1 Main St")
            .with_text(FieldPath::root(tags::MODALITY), VR::CS, "MR");
        let cleared = clear_auxiliary_fields(&mut container, &ScrubPlan::default().clear_fields);
        assert_eq!(cleared, 1);
        assert!(container.read(&nested).is_none());
        assert!(container.contains(tags::MODALITY));
    }

    #[test]
    fn extra_fields_extend_the_plan() {
        let plan = ScrubPlan::default().with_extra_fields([tags::INSTITUTION_NAME, tags::PATIENT_ADDRESS]);
        assert_eq!(plan.clear_fields.len(), AUXILIARY_FIELDS.len() + 1);
    }

    #[test]
    fn vendor_name_field_is_stamped_when_present() {
        let mut container = MemoryContainer::default()
            .with_text(FieldPath::root(VENDOR_PATIENT_NAME), VR::LO, "DOE JOHN");
        stamp_identity(&mut container, "subj_x");
        assert_eq!(
            container.text(&FieldPath::root(VENDOR_PATIENT_NAME)).as_deref(),
            Some("subj_x")
        );
    }
}
