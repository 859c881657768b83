//! FairPlay sinf injection into downloaded IPA archives.
//!
//! Every existing entry is copied with its compressed bytes untouched
//! (`raw_copy_file`); altering them would invalidate the code signature. Only
//! the sinf files and `iTunesMetadata.plist` are written fresh.
//!
//! Two signature layouts exist:
//!
//! - **manifest**: `SC_Info/Manifest.plist` inside the app bundle lists one
//!   relative path per sinf, paired positionally with the sinfs returned by
//!   the download endpoint;
//! - **legacy**: no manifest; the single sinf goes to
//!   `SC_Info/<CFBundleExecutable>.sinf`.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const METADATA_ENTRY: &str = "iTunesMetadata.plist";

const INFO_PLIST_SUFFIX: &str = ".app/Info.plist";
const WATCH_DIR: &str = "/Watch/";

/// DRM signature blob returned by the download endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sinf {
    pub id: i64,
    pub data: Vec<u8>,
}

/// Which signature layout was applied and where the sinfs were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repackaged {
    pub bundle_name: String,
    pub sinf_paths: Vec<String>,
    pub legacy: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PackageManifest {
    #[serde(rename = "SinfPaths", default)]
    sinf_paths: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageInfo {
    #[serde(rename = "CFBundleExecutable", default)]
    bundle_executable: String,
}

/// Copies `src` to `dst`, injecting sinfs and optionally a fresh metadata plist.
///
/// The output is assembled at `<dst>.part` and renamed into place only once
/// complete, so a failure never leaves a truncated file at `dst`.
pub fn repackage(
    src: &Path,
    dst: &Path,
    sinfs: &[Sinf],
    metadata: Option<&plist::Dictionary>,
) -> Result<Repackaged> {
    let part = part_path(dst);

    match write_package(src, &part, sinfs, metadata) {
        Ok(report) => {
            fs::rename(&part, dst)?;
            Ok(report)
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

/// Re-injects sinfs into an already downloaded package, in place.
pub fn replicate_sinf(path: &Path, sinfs: &[Sinf]) -> Result<Repackaged> {
    repackage(path, path, sinfs, None)
}

fn write_package(
    src: &Path,
    part: &Path,
    sinfs: &[Sinf],
    metadata: Option<&plist::Dictionary>,
) -> Result<Repackaged> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(src)?))?;
    let names = entry_names(&mut archive)?;

    let (info_path, bundle_name) = locate_bundle(&names)?;
    let bundle_dir = info_path.trim_end_matches("Info.plist").to_string();
    let manifest_path = format!("{bundle_dir}SC_Info/Manifest.plist");

    let (targets, legacy) = if names.iter().any(|n| *n == manifest_path) {
        let manifest: PackageManifest = read_plist(&mut archive, &manifest_path)?;
        (manifest_targets(&bundle_name, &manifest.sinf_paths, sinfs)?, false)
    } else {
        let info: PackageInfo = read_plist(&mut archive, &info_path)?;
        (legacy_target(&bundle_name, &info.bundle_executable, sinfs)?, true)
    };
    debug!(bundle = %bundle_name, legacy, sinfs = targets.len(), "injecting sinfs");

    // Entries about to be rewritten are not copied, zip names must stay unique
    let mut replaced: HashSet<&str> = targets.iter().map(|(path, _)| path.as_str()).collect();
    if metadata.is_some() {
        replaced.insert(METADATA_ENTRY);
    }

    let mut writer = ZipWriter::new(BufWriter::new(File::create(part)?));
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if replaced.contains(entry.name()) {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (path, sinf) in &targets {
        debug!(%path, "writing sinf");
        writer.start_file(path.as_str(), options)?;
        writer.write_all(&sinf.data)?;
    }

    if let Some(metadata) = metadata {
        writer.start_file(METADATA_ENTRY, options)?;
        plist::to_writer_binary(&mut writer, &plist::Value::Dictionary(metadata.clone()))?;
    }

    writer.finish()?.flush()?;

    Ok(Repackaged {
        bundle_name,
        sinf_paths: targets.into_iter().map(|(path, _)| path).collect(),
        legacy,
    })
}

fn entry_names<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        names.push(archive.by_index_raw(index)?.name().to_string());
    }
    Ok(names)
}

/// Finds the top-level app `Info.plist`, skipping companion Watch apps.
///
/// Returns the entry path and the bundle name without `.app`.
pub fn locate_bundle(names: &[String]) -> Result<(String, String)> {
    let info_path = names
        .iter()
        .find(|name| name.ends_with(INFO_PLIST_SUFFIX) && !name.contains(WATCH_DIR))
        .ok_or(StoreError::BundleNotFound)?;

    let bundle_path = info_path.trim_end_matches(INFO_PLIST_SUFFIX);
    let bundle_name = bundle_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or(StoreError::BundleNotFound)?;

    Ok((info_path.clone(), bundle_name.to_string()))
}

fn manifest_targets<'a>(
    bundle_name: &str,
    sinf_paths: &[String],
    sinfs: &'a [Sinf],
) -> Result<Vec<(String, &'a Sinf)>> {
    if sinf_paths.len() != sinfs.len() {
        return Err(StoreError::SinfCountMismatch {
            paths: sinf_paths.len(),
            sinfs: sinfs.len(),
        });
    }

    Ok(sinf_paths
        .iter()
        .zip(sinfs)
        .map(|(path, sinf)| (format!("Payload/{bundle_name}.app/{path}"), sinf))
        .collect())
}

fn legacy_target<'a>(
    bundle_name: &str,
    executable: &str,
    sinfs: &'a [Sinf],
) -> Result<Vec<(String, &'a Sinf)>> {
    let sinf = sinfs.first().ok_or(StoreError::MissingSinf)?;
    if executable.is_empty() {
        return Err(StoreError::InvalidPackage(
            "Info.plist has no CFBundleExecutable".to_string(),
        ));
    }

    Ok(vec![(
        format!("Payload/{bundle_name}.app/SC_Info/{executable}.sinf"),
        sinf,
    )])
}

fn read_plist<T, R>(archive: &mut ZipArchive<R>, name: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    R: Read + Seek,
{
    let mut data = Vec::new();
    archive.by_name(name)?.read_to_end(&mut data)?;
    Ok(plist::from_bytes(&data)?)
}

fn part_path(dst: &Path) -> PathBuf {
    let mut path = dst.as_os_str().to_owned();
    path.push(".part");
    PathBuf::from(path)
}
