use dicom_core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom_core::{DataElement, Length, Tag, VR};
use dicom_dictionary_std::{tags, StandardDataDictionary};
use dicom_object::{DefaultDicomObject, InMemDicomObject};

use crate::container::{Field, FieldPath, FieldValue, MetadataContainer, PathEntry};
use crate::error::ContainerError;

type DicomObject = InMemDicomObject<StandardDataDictionary>;

/// Small helper trait to pull string values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
}

impl ElementAccess for DicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }
}

/// Character-data value representations.
pub fn is_text_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::AE
            | VR::AS
            | VR::CS
            | VR::DA
            | VR::DS
            | VR::DT
            | VR::IS
            | VR::LO
            | VR::LT
            | VR::PN
            | VR::SH
            | VR::ST
            | VR::TM
            | VR::UC
            | VR::UI
            | VR::UR
            | VR::UT
    )
}

/// Opaque byte representations that vendors use to smuggle text.
pub fn is_byte_text_vr(vr: VR) -> bool {
    matches!(vr, VR::OB | VR::UN)
}

fn collect_fields(obj: &DicomObject, parent: Option<(&FieldPath, usize)>, out: &mut Vec<Field>) {
    for elem in obj.iter() {
        let tag = elem.header().tag;
        let vr = elem.header().vr;
        let path = match parent {
            None => FieldPath::root(tag),
            Some((seq_path, index)) => seq_path.child(index, tag),
        };

        match elem.value() {
            Value::Primitive(PrimitiveValue::Empty) => {}
            Value::Primitive(p) => {
                if tag == tags::PIXEL_DATA {
                    continue;
                }
                let value = if is_text_vr(vr) {
                    FieldValue::Text(p.to_multi_str().into_owned())
                } else if is_byte_text_vr(vr) {
                    FieldValue::Bytes(p.to_bytes().into_owned())
                } else {
                    continue;
                };
                out.push(Field { path, vr, value });
            }
            Value::Sequence(seq) => {
                for (index, item) in seq.items().iter().enumerate() {
                    collect_fields(item, Some((&path, index)), out);
                }
            }
            // Encapsulated pixel data carries no metadata.
            Value::PixelSequence(_) => {}
        }
    }
}

/// Walk `entries` down through sequence items and apply `op` to the element it names.
fn modify_at<T>(
    obj: &mut DicomObject,
    path: &FieldPath,
    entries: &[PathEntry],
    op: impl FnOnce(&mut DicomObject, Tag) -> Result<T, ContainerError>,
) -> Result<T, ContainerError> {
    match entries {
        [PathEntry::Element(tag)] => op(obj, *tag),
        [PathEntry::Element(seq_tag), PathEntry::Item(index), rest @ ..] if !rest.is_empty() => {
            let elem = obj
                .element(*seq_tag)
                .map_err(|_| ContainerError::MissingField(path.clone()))?;
            let vr = elem.header().vr;
            let mut items = match elem.value() {
                Value::Sequence(seq) => seq.items().to_vec(),
                _ => return Err(ContainerError::NotWritable(path.clone())),
            };
            let item = items
                .get_mut(*index)
                .ok_or_else(|| ContainerError::MissingField(path.clone()))?;
            let result = modify_at(item, path, rest, op)?;
            obj.put(DataElement::new(
                *seq_tag,
                vr,
                Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
            ));
            Ok(result)
        }
        _ => Err(ContainerError::MissingField(path.clone())),
    }
}

fn strip_private(obj: &mut DicomObject) -> usize {
    let private: Vec<Tag> = obj
        .iter()
        .map(|elem| elem.header().tag)
        .filter(|tag| tag.group() % 2 == 1)
        .collect();
    for tag in &private {
        obj.remove_element(*tag);
    }
    let mut removed = private.len();

    let sequences: Vec<(Tag, VR, Vec<DicomObject>)> = obj
        .iter()
        .filter_map(|elem| match elem.value() {
            Value::Sequence(seq) => Some((elem.header().tag, elem.header().vr, seq.items().to_vec())),
            _ => None,
        })
        .collect();
    for (tag, vr, mut items) in sequences {
        let nested: usize = items.iter_mut().map(strip_private).sum();
        if nested > 0 {
            removed += nested;
            obj.put(DataElement::new(
                tag,
                vr,
                Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
            ));
        }
    }
    removed
}

impl MetadataContainer for DicomObject {
    fn fields(&self) -> Vec<Field> {
        let mut out = Vec::new();
        collect_fields(self, None, &mut out);
        out
    }

    fn write(&mut self, path: &FieldPath, value: FieldValue) -> Result<(), ContainerError> {
        modify_at(self, path, path.entries(), |obj, tag| {
            let vr = obj
                .element(tag)
                .map_err(|_| ContainerError::MissingField(path.clone()))?
                .header()
                .vr;
            let primitive = match value {
                FieldValue::Text(values) if is_text_vr(vr) => {
                    if values.is_empty() {
                        PrimitiveValue::Empty
                    } else {
                        PrimitiveValue::Strs(values.into_iter().collect())
                    }
                }
                FieldValue::Bytes(bytes) if is_byte_text_vr(vr) => {
                    if bytes.len() % 2 == 1 {
                        return Err(ContainerError::Encoding {
                            path: path.clone(),
                            reason: "odd byte length".into(),
                        });
                    }
                    PrimitiveValue::from(bytes)
                }
                _ => return Err(ContainerError::NotWritable(path.clone())),
            };
            obj.put(DataElement::new(tag, vr, primitive));
            Ok(())
        })
    }

    fn remove(&mut self, path: &FieldPath) -> bool {
        modify_at(self, path, path.entries(), |obj, tag| {
            if obj.remove_element(tag) {
                Ok(())
            } else {
                Err(ContainerError::MissingField(path.clone()))
            }
        })
        .is_ok()
    }

    fn put_text(&mut self, tag: Tag, vr: VR, value: &str) {
        self.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    }

    fn contains(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn remove_private(&mut self) -> usize {
        strip_private(self)
    }
}

impl MetadataContainer for DefaultDicomObject {
    fn fields(&self) -> Vec<Field> {
        (**self).fields()
    }

    fn write(&mut self, path: &FieldPath, value: FieldValue) -> Result<(), ContainerError> {
        (**self).write(path, value)
    }

    fn remove(&mut self, path: &FieldPath) -> bool {
        (**self).remove(path)
    }

    fn put_text(&mut self, tag: Tag, vr: VR, value: &str) {
        (**self).put_text(tag, vr, value)
    }

    fn contains(&self, tag: Tag) -> bool {
        (**self).contains(tag)
    }

    fn remove_private(&mut self) -> usize {
        (**self).remove_private()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DicomObject {
        let mut item = DicomObject::new_empty_with_dict(StandardDataDictionary);
        item.put(DataElement::new(
            Tag(0x0008, 0x1150),
            VR::UI,
            PrimitiveValue::from("1.2.3"),
        ));
        item.put(DataElement::new(
            Tag(0x0040, 0xA160),
            VR::UT,
            PrimitiveValue::from("report for DOE^JOHN"),
        ));

        let mut obj = DicomObject::new_empty_with_dict(StandardDataDictionary);
        obj.put(DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            PrimitiveValue::from("DOE^JOHN"),
        ));
        obj.put(DataElement::new(
            tags::ROWS,
            VR::US,
            PrimitiveValue::from(2_u16),
        ));
        obj.put(DataElement::new(
            Tag(0x0029, 0x1010),
            VR::UN,
            PrimitiveValue::from(b"DOE JOHN".to_vec()),
        ));
        obj.put(DataElement::new(
            Tag(0x0008, 0x1110),
            VR::SQ,
            Value::Sequence(DataSetSequence::new(vec![item], Length::UNDEFINED)),
        ));
        obj
    }

    #[test]
    fn enumerates_nested_and_private_fields_but_not_numbers() {
        let obj = sample();
        let paths: Vec<String> = obj.fields().iter().map(|f| f.path.to_string()).collect();
        assert!(paths.contains(&"00100010".to_string()));
        assert!(paths.contains(&"00291010".to_string()));
        assert!(paths.contains(&"00081110/[0]/0040A160".to_string()));
        assert!(!paths.contains(&"00280010".to_string()));
    }

    #[test]
    fn writes_into_sequence_items() {
        let mut obj = sample();
        let path = FieldPath::root(Tag(0x0008, 0x1110)).child(0, Tag(0x0040, 0xA160));
        obj.write(&path, FieldValue::Text(vec!["report for ".into()]))
            .expect("write nested");
        assert_eq!(
            obj.read(&path),
            Some(FieldValue::Text(vec!["report for ".into()]))
        );
        // Siblings in the item survive the rebuild.
        let uid = FieldPath::root(Tag(0x0008, 0x1110)).child(0, Tag(0x0008, 0x1150));
        assert_eq!(obj.read(&uid), Some(FieldValue::Text(vec!["1.2.3".into()])));
    }

    #[test]
    fn refuses_to_write_text_into_bytes() {
        let mut obj = sample();
        let path = FieldPath::root(Tag(0x0029, 0x1010));
        let err = obj.write(&path, FieldValue::Text(vec!["x".into()])).unwrap_err();
        assert_eq!(err, ContainerError::NotWritable(path));
    }

    #[test]
    fn strips_private_elements() {
        let mut obj = sample();
        assert_eq!(obj.remove_private(), 1);
        assert!(!obj.contains(Tag(0x0029, 0x1010)));
        assert!(obj.contains(tags::PATIENT_NAME));
    }
}
