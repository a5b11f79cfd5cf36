mod common;

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{FileDicomObject, FileMetaTableBuilder};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use dicom_dictionary_std::tags;
use tempfile::TempDir;

use common::{axial_at, ds, image, text, u16_bytes};
use dicom_stack::{ReaderConfig, ReaderError, RowOrder, Stage, VolumeReader};

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

fn write_slice(dir: &Path, name: &str, z: f64, values: &[u16]) -> PathBuf {
    let instance_uid = format!("1.2.826.0.1.3680043.2.1125.{}", (z * 10.0) as i64 + 1);
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
        .media_storage_sop_instance_uid(instance_uid.as_str())
        .build()
        .unwrap();
    let mut object = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);

    let mut elements = image(2, 2, 16, false);
    elements.extend(axial_at(z));
    elements.extend([
        text(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE),
        text(tags::SOP_INSTANCE_UID, VR::UI, &instance_uid),
        text(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.826.0.1.3680043.2.1125.7"),
        ds(tags::RESCALE_SLOPE, &[1.0]),
        ds(tags::RESCALE_INTERCEPT, &[-1024.0]),
        DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(u16_bytes(values))),
    ]);
    for element in elements {
        object.put(element);
    }

    let path = dir.join(name);
    object.write_to_file(&path).unwrap();
    path
}

fn series() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_slice(dir.path(), "a.dcm", 10.0, &[20, 21, 22, 23]);
    write_slice(dir.path(), "b.dcm", 0.0, &[0, 1, 2, 3]);
    write_slice(dir.path(), "c.dc", 5.0, &[10, 11, 12, 13]);
    fs::write(dir.path().join("notes.txt"), "not a DICOM file").unwrap();
    dir
}

#[test]
fn directory_is_read_end_to_end() {
    let dir = series();
    let config = ReaderConfig::default().with_row_order(RowOrder::TopDown);
    let mut reader = VolumeReader::from_directory(dir.path(), config).unwrap();
    assert_eq!(reader.file_names().len(), 3);

    let info = reader.update_information().unwrap();
    assert_eq!(info.slice_map.file_indices, vec![1, 2, 0]);
    assert_eq!(info.geometry.spacing, [1.0, 1.0, 5.0]);
    assert_eq!((info.rescale.slope, info.rescale.intercept), (1.0, -1024.0));
    assert!(!info.rescale.applied);

    let file = reader.metadata().file(0).unwrap();
    assert_eq!(file.transfer_syntax, EXPLICIT_VR_LITTLE_ENDIAN.uid());
    assert_eq!(
        file.series_instance_uid.as_deref(),
        Some("1.2.826.0.1.3680043.2.1125.7")
    );

    let volume = reader.read_data().unwrap();
    let voxels = volume.voxels.array::<u16>().unwrap();
    let firsts: Vec<u16> = (0..3).map(|slice| voxels[[0, slice, 0, 0, 0]]).collect();
    assert_eq!(firsts, vec![0, 10, 20]);
    assert_eq!(voxels[[0, 2, 1, 1, 0]], 23);
}

#[test]
fn default_reader_flips_rows_of_real_files() {
    let dir = series();
    let mut reader = VolumeReader::from_directory(dir.path(), ReaderConfig::default()).unwrap();
    let volume = reader.read_data().unwrap();
    let voxels = volume.voxels.array::<u16>().unwrap();
    assert_eq!(voxels[[0, 0, 0, 0, 0]], 2);
    assert_eq!(voxels[[0, 0, 1, 0, 0]], 0);
}

#[test]
fn directory_without_dicom_files_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("readme.txt"), "empty").unwrap();
    let error = VolumeReader::from_directory(dir.path(), ReaderConfig::default())
        .err()
        .unwrap();
    assert!(matches!(error, ReaderError::Configuration(_)));
}

#[test]
fn missing_file_is_reported_with_its_index() {
    let dir = series();
    let mut names = vec![dir.path().join("b.dcm")];
    names.push(dir.path().join("gone.dcm"));
    let mut reader = VolumeReader::new(names, ReaderConfig::default());
    let error = reader.update_information().unwrap_err();
    assert_eq!(error.stage(), Stage::Parse);
    assert_eq!(error.file_index(), Some(1));
}
