//! Locating the five binaries that make up one firmware version.
//!
//! A version directory has no manifest. Each image is recognised purely by the
//! flash address encoded at the end of its file name:
//!
//! | role         | suffix                      | address   |
//! |--------------|-----------------------------|-----------|
//! | bootloader   | `_0x1000.bin`               | `0x1000`  |
//! | application  | `_0x10000.bin`              | `0x10000` |
//! | partitions   | `_0x8000.bin`               | `0x8000`  |
//! | OTA data     | `_0xe000.bin`               | `0xe000`  |
//! | variant data | `{variant}_0x9000.bin`      | `0x9000`  |

use std::fs;
use std::path::{Path, PathBuf};

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{Error, Result};

/// File name suffix shared by every variant data blob.
pub const VARIANT_SUFFIX: &str = "_0x9000.bin";

#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageRole {
    #[strum(serialize = "bootloader")]
    Bootloader,
    #[strum(serialize = "application")]
    Application,
    #[strum(serialize = "partition table")]
    Partitions,
    #[strum(serialize = "OTA data")]
    OtaData,
    #[strum(serialize = "variant data")]
    VariantData,
}

impl ImageRole {
    /// Flash offset the image is written to.
    pub fn address(self) -> u32 {
        match self {
            ImageRole::Bootloader => 0x1000,
            ImageRole::Application => 0x10000,
            ImageRole::Partitions => 0x8000,
            ImageRole::OtaData => 0xe000,
            ImageRole::VariantData => 0x9000,
        }
    }

    /// Suffix that identifies the role, `None` for the variant blob whose
    /// suffix depends on the chosen variant.
    pub fn fixed_suffix(self) -> Option<&'static str> {
        match self {
            ImageRole::Bootloader => Some("_0x1000.bin"),
            ImageRole::Application => Some("_0x10000.bin"),
            ImageRole::Partitions => Some("_0x8000.bin"),
            ImageRole::OtaData => Some("_0xe000.bin"),
            ImageRole::VariantData => None,
        }
    }
}

/// Absolute paths of one complete image set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub bootloader: PathBuf,
    pub application: PathBuf,
    pub partitions: PathBuf,
    pub ota_data: PathBuf,
    pub variant_data: PathBuf,
}

impl ImageSet {
    /// Resolves the image set for `variant` inside `version_dir`.
    ///
    /// `variant` may be the variant file name (`battery_sw_a_0x9000.bin`) or
    /// its base (`battery_sw_a`). Every role must match exactly one file;
    /// nothing touches the device when this fails.
    pub fn resolve(version_dir: &Path, variant: &str) -> Result<Self> {
        if !version_dir.is_dir() {
            return Err(Error::VersionNotFound(version_dir.to_path_buf()));
        }

        let base = variant_base(variant)?;
        let names = list_file_names(version_dir)?;
        tracing::debug!(
            "Resolving images for variant `{}` among {} files in {}",
            base,
            names.len(),
            version_dir.display()
        );

        let find = |role: ImageRole| -> Result<PathBuf> {
            let name = match role.fixed_suffix() {
                Some(suffix) => match_unique(&names, version_dir, role, suffix)?,
                None => match_variant(&names, version_dir, &base)?,
            };
            let path = std::path::absolute(version_dir.join(name))?;
            tracing::debug!("{} -> {}", role, path.display());
            Ok(path)
        };

        let missing = |role: ImageRole, suffix: String| Error::MissingImage {
            role,
            suffix,
            dir: version_dir.to_path_buf(),
        };

        let set = ImageSet {
            bootloader: find(ImageRole::Bootloader)?,
            application: find(ImageRole::Application)?,
            partitions: find(ImageRole::Partitions)?,
            ota_data: find(ImageRole::OtaData)?,
            variant_data: find(ImageRole::VariantData)?,
        };

        // The listing may be stale by the time we get here.
        for role in ImageRole::iter() {
            if !set.path(role).is_file() {
                return Err(missing(role, suffix_for(role, &base)));
            }
        }

        Ok(set)
    }

    /// Resolves the image set from the full path of the chosen variant file.
    pub fn resolve_variant_file(variant_file: &Path) -> Result<Self> {
        let dir = variant_file.parent().ok_or_else(|| {
            Error::invalid_input(format!(
                "variant path has no parent directory: {}",
                variant_file.display()
            ))
        })?;
        let name = variant_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::invalid_input(format!(
                    "variant path has no file name: {}",
                    variant_file.display()
                ))
            })?;
        Self::resolve(dir, name)
    }

    pub fn path(&self, role: ImageRole) -> &Path {
        match role {
            ImageRole::Bootloader => &self.bootloader,
            ImageRole::Application => &self.application,
            ImageRole::Partitions => &self.partitions,
            ImageRole::OtaData => &self.ota_data,
            ImageRole::VariantData => &self.variant_data,
        }
    }

    /// (address, path) pairs in the order handed to the write command.
    pub fn write_order(&self) -> Vec<(u32, &Path)> {
        ImageRole::iter()
            .map(|role| (role.address(), self.path(role)))
            .collect()
    }
}

/// Strips the variant suffix from a variant file name.
pub fn variant_base(variant: &str) -> Result<String> {
    let name = Path::new(variant)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(variant);
    let base = name.strip_suffix(VARIANT_SUFFIX).unwrap_or(name);
    if base.is_empty() {
        return Err(Error::invalid_input(format!(
            "variant name `{}` has no base",
            variant
        )));
    }
    Ok(base.to_string())
}

/// Version directories under `flash_dir`, newest first.
pub fn list_versions(flash_dir: &Path) -> Result<Vec<String>> {
    let mut versions = Vec::new();
    for entry in fs::read_dir(flash_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            versions.push(name.to_string());
        }
    }
    versions.sort();
    versions.reverse();
    Ok(versions)
}

/// Variant bases available in `version_dir`, sorted.
///
/// When `markers` is not empty only file names containing one of them are
/// listed.
pub fn list_variants(version_dir: &Path, markers: &[String]) -> Result<Vec<String>> {
    if !version_dir.is_dir() {
        return Err(Error::VersionNotFound(version_dir.to_path_buf()));
    }
    let mut variants: Vec<String> = list_file_names(version_dir)?
        .into_iter()
        .filter(|name| markers.is_empty() || markers.iter().any(|m| name.contains(m.as_str())))
        .filter_map(|name| name.strip_suffix(VARIANT_SUFFIX).map(str::to_string))
        .filter(|base| !base.is_empty())
        .collect();
    variants.sort();
    Ok(variants)
}

fn suffix_for(role: ImageRole, base: &str) -> String {
    match role.fixed_suffix() {
        Some(suffix) => suffix.to_string(),
        None => format!("{}{}", base, VARIANT_SUFFIX),
    }
}

fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => tracing::warn!("Skipping non UTF-8 file name {:?}", name),
        }
    }
    Ok(names)
}

fn match_unique<'a>(
    names: &'a [String],
    dir: &Path,
    role: ImageRole,
    suffix: &str,
) -> Result<&'a str> {
    let mut matches: Vec<&String> = names.iter().filter(|n| n.ends_with(suffix)).collect();
    match matches.len() {
        0 => Err(Error::MissingImage {
            role,
            suffix: suffix.to_string(),
            dir: dir.to_path_buf(),
        }),
        1 => Ok(matches[0].as_str()),
        _ => {
            matches.sort();
            Err(Error::AmbiguousImage {
                role,
                suffix: suffix.to_string(),
                candidates: matches.into_iter().cloned().collect(),
            })
        }
    }
}

fn match_variant<'a>(names: &'a [String], dir: &Path, base: &str) -> Result<&'a str> {
    let suffix = format!("{}{}", base, VARIANT_SUFFIX);
    // `sw_a_0x9000.bin` is also a suffix of `battery_sw_a_0x9000.bin`; the
    // exact name always wins over longer names sharing it.
    if let Some(exact) = names.iter().find(|n| **n == suffix) {
        return Ok(exact.as_str());
    }
    match_unique(names, dir, ImageRole::VariantData, &suffix)
}
