// Sinf injection into IPA archives

mod test_helpers;

use ipatool::StoreError;
use ipatool::package::{METADATA_ENTRY, repackage};
use ipatool::{Sinf, replicate_sinf};
use std::path::Path;
use tempfile::TempDir;
use test_helpers::*;

fn sinf(id: i64, data: &[u8]) -> Sinf {
    Sinf {
        id,
        data: data.to_vec(),
    }
}

fn write(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn raw_fingerprint(path: &Path, name: &str) -> (u32, u64) {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let entry = archive.by_name(name).unwrap();
    (entry.crc32(), entry.compressed_size())
}

#[test]
fn test_manifest_sinfs_written_in_order() {
    let dir = TempDir::new().unwrap();
    let src = write(
        &dir,
        "in.ipa",
        &manifest_ipa(&["SC_Info/Demo.sinf", "Frameworks/Kit.framework/SC_Info/Kit.sinf"]),
    );
    let dst = dir.path().join("out.ipa");

    let report = repackage(&src, &dst, &[sinf(0, b"first"), sinf(1, b"second")], None).unwrap();

    assert!(!report.legacy);
    assert_eq!(report.bundle_name, "Demo");
    let entries = read_entries(&dst);
    assert_eq!(entries["Payload/Demo.app/SC_Info/Demo.sinf"], b"first");
    assert_eq!(
        entries["Payload/Demo.app/Frameworks/Kit.framework/SC_Info/Kit.sinf"],
        b"second"
    );
    assert!(!entries.contains_key(METADATA_ENTRY));
}

#[test]
fn test_existing_entries_copied_without_recompression() {
    let dir = TempDir::new().unwrap();
    let src = write(&dir, "in.ipa", &manifest_ipa(&["SC_Info/Demo.sinf"]));
    let dst = dir.path().join("out.ipa");

    repackage(&src, &dst, &[sinf(0, b"sig")], None).unwrap();

    for name in ["Payload/Demo.app/Demo", "Payload/Demo.app/Info.plist"] {
        assert_eq!(raw_fingerprint(&src, name), raw_fingerprint(&dst, name));
    }
    assert_eq!(read_entries(&dst)["Payload/Demo.app/Demo"], b"\xcf\xfa\xed\xfe binary");
}

#[test]
fn test_sinf_count_mismatch_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let src = write(&dir, "in.ipa", &manifest_ipa(&["SC_Info/Demo.sinf"]));
    let dst = dir.path().join("out.ipa");

    let err = repackage(&src, &dst, &[sinf(0, b"a"), sinf(1, b"b")], None).unwrap_err();

    assert!(matches!(
        err,
        StoreError::SinfCountMismatch { paths: 1, sinfs: 2 }
    ));
    assert!(!dst.exists());
    assert!(!dir.path().join("out.ipa.part").exists());
}

#[test]
fn test_legacy_package_uses_executable_name() {
    let dir = TempDir::new().unwrap();
    let info = plist_bytes(dict(vec![("CFBundleExecutable", "DemoExec".into())]));
    let src = write(
        &dir,
        "in.ipa",
        &build_ipa(&[
            ("Payload/Demo.app/Info.plist", &info),
            ("Payload/Demo.app/DemoExec", b"exec"),
        ]),
    );
    let dst = dir.path().join("out.ipa");

    let report = repackage(&src, &dst, &[sinf(0, b"legacy")], None).unwrap();

    assert!(report.legacy);
    assert_eq!(
        read_entries(&dst)["Payload/Demo.app/SC_Info/DemoExec.sinf"],
        b"legacy"
    );
}

#[test]
fn test_legacy_package_without_sinf_fails() {
    let dir = TempDir::new().unwrap();
    let info = plist_bytes(dict(vec![("CFBundleExecutable", "Demo".into())]));
    let src = write(
        &dir,
        "in.ipa",
        &build_ipa(&[("Payload/Demo.app/Info.plist", &info)]),
    );

    let err = repackage(&src, &dir.path().join("out.ipa"), &[], None).unwrap_err();
    assert!(matches!(err, StoreError::MissingSinf));
}

#[test]
fn test_watch_app_is_not_the_bundle() {
    let dir = TempDir::new().unwrap();
    let watch_info = plist_bytes(dict(vec![("CFBundleExecutable", "Watchy".into())]));
    let info = plist_bytes(dict(vec![("CFBundleExecutable", "Demo".into())]));
    let src = write(
        &dir,
        "in.ipa",
        &build_ipa(&[
            ("Payload/Demo.app/Watch/Watchy.app/Info.plist", &watch_info),
            ("Payload/Demo.app/Info.plist", &info),
        ]),
    );
    let dst = dir.path().join("out.ipa");

    let report = repackage(&src, &dst, &[sinf(0, b"s")], None).unwrap();

    assert_eq!(report.bundle_name, "Demo");
    assert!(read_entries(&dst).contains_key("Payload/Demo.app/SC_Info/Demo.sinf"));
}

#[test]
fn test_package_without_bundle_fails() {
    let dir = TempDir::new().unwrap();
    let src = write(&dir, "in.ipa", &build_ipa(&[("README", b"hi")]));

    let err = repackage(&src, &dir.path().join("out.ipa"), &[sinf(0, b"s")], None).unwrap_err();
    assert!(matches!(err, StoreError::BundleNotFound));
}

#[test]
fn test_metadata_written_as_property_list() {
    let dir = TempDir::new().unwrap();
    let src = write(&dir, "in.ipa", &manifest_ipa(&["SC_Info/Demo.sinf"]));
    let dst = dir.path().join("out.ipa");
    let metadata = dict(vec![
        ("apple-id", "user@example.com".into()),
        ("bundleShortVersionString", "1.2.3".into()),
    ]);

    repackage(&src, &dst, &[sinf(0, b"s")], Some(&metadata)).unwrap();

    let written: plist::Dictionary = plist::from_bytes(&read_entries(&dst)[METADATA_ENTRY]).unwrap();
    assert_eq!(
        written.get("apple-id").and_then(plist::Value::as_string),
        Some("user@example.com")
    );
    assert_eq!(
        written
            .get("bundleShortVersionString")
            .and_then(plist::Value::as_string),
        Some("1.2.3")
    );
}

#[test]
fn test_replicate_sinf_replaces_existing_signature() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "app.ipa", &manifest_ipa(&["SC_Info/Demo.sinf"]));
    replicate_sinf(&path, &[sinf(0, b"old")]).unwrap();

    replicate_sinf(&path, &[sinf(0, b"new")]).unwrap();

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
    let count = (0..archive.len())
        .filter(|&i| archive.by_index(i).unwrap().name() == "Payload/Demo.app/SC_Info/Demo.sinf")
        .count();
    assert_eq!(count, 1);
    assert_eq!(read_entries(&path)["Payload/Demo.app/SC_Info/Demo.sinf"], b"new");
}
