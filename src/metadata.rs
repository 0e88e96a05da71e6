//
// metadata.rs
// Dicom-Anonymizer-rs
//
// Reads the retained covariates and the patient-name candidates of a session's files.
//
// Thales Matheus Mendonça Santos - November 2025

use chrono::{Datelike, NaiveDate};
use dicom_core::Tag;

use crate::container::FieldPath;
use crate::dicom_access::ElementAccess;
use crate::models::Covariates;
use crate::resolver::NameCandidate;
use crate::scrub::VENDOR_PATIENT_NAME;

const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);
const PATIENT_AGE: Tag = Tag(0x0010, 0x1010);
const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
const SERIES_DATE: Tag = Tag(0x0008, 0x0021);
const ACQUISITION_DATE: Tag = Tag(0x0008, 0x0022);

fn text_for_tag<T: ElementAccess>(obj: &T, tag: Tag) -> Option<String> {
    obj.element_str(tag)
}

/// Parse a DICOM DA value (`YYYYMMDD`, tolerating the old `YYYY.MM.DD` form).
pub fn parse_da(value: &str) -> Option<NaiveDate> {
    let digits: String = value.trim().chars().filter(|c| *c != '.').collect();
    NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
}

/// Whole years from `birth` to `on`.
pub fn age_in_years(birth: NaiveDate, on: NaiveDate) -> Option<u32> {
    if on < birth {
        return None;
    }
    let mut years = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

pub fn extract_covariates<T: ElementAccess>(obj: &T) -> Covariates {
    let birth_date = text_for_tag(obj, PATIENT_BIRTH_DATE);
    let study_date = text_for_tag(obj, STUDY_DATE)
        .or_else(|| text_for_tag(obj, ACQUISITION_DATE))
        .or_else(|| text_for_tag(obj, SERIES_DATE));
    let age_at_scan = match (
        birth_date.as_deref().and_then(parse_da),
        study_date.as_deref().and_then(parse_da),
    ) {
        (Some(birth), Some(scan)) => age_in_years(birth, scan),
        _ => None,
    };

    Covariates {
        birth_date,
        sex: text_for_tag(obj, PATIENT_SEX),
        age: text_for_tag(obj, PATIENT_AGE),
        study_date,
        age_at_scan,
    }
}

/// Fill the gaps of `base` from `other`, keeping what `base` already has.
pub fn merge_covariates(base: Covariates, other: &Covariates) -> Covariates {
    Covariates {
        birth_date: base.birth_date.or_else(|| other.birth_date.clone()),
        sex: base.sex.or_else(|| other.sex.clone()),
        age: base.age.or_else(|| other.age.clone()),
        study_date: base.study_date.or_else(|| other.study_date.clone()),
        age_at_scan: base.age_at_scan.or(other.age_at_scan),
    }
}

/// Patient-name candidates of one file: PatientName, then the vendor name field.
pub fn name_candidates<T: ElementAccess>(obj: &T, file: &str) -> Vec<NameCandidate> {
    [PATIENT_NAME, VENDOR_PATIENT_NAME]
        .into_iter()
        .filter_map(|tag| {
            text_for_tag(obj, tag).map(|raw| NameCandidate::new(&raw, file, FieldPath::root(tag)))
        })
        .filter(|candidate| !candidate.normalized_tokens.is_empty())
        .collect()
}
