//! The static registry of archive formats.
//!
//! Every format is extracted by the same external program; what varies is
//! pure data: how the format is recognised, which password it falls back to,
//! and the argument template handed to the program. [`REGISTRY`] lists the
//! descriptors in detection priority order.

use std::fmt;

use crate::error::Error;
use crate::handle::FileHandle;

/// Placeholder replaced by the archive path.
pub const SOURCE: &str = "{source}";
/// Placeholder replaced by the per-invocation destination directory.
pub const DESTINATION: &str = "{destination}";
/// Placeholder replaced by the effective password.
pub const PASSWORD: &str = "{password}";

/// A registered archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Zip,
    SevenZip,
    Gzip,
    Lzh,
    Vhd,
    Wim,
    Xz,
    Nsis,
}

impl Format {
    /// All formats, in registry order.
    pub const ALL: [Format; 8] = [
        Format::Zip,
        Format::SevenZip,
        Format::Gzip,
        Format::Lzh,
        Format::Vhd,
        Format::Wim,
        Format::Xz,
        Format::Nsis,
    ];

    pub fn descriptor(self) -> &'static FormatDescriptor {
        &REGISTRY[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static metadata describing how to recognise and extract one format.
#[derive(Debug)]
pub struct FormatDescriptor {
    pub format: Format,
    /// Unique symbolic name.
    pub name: &'static str,
    /// Filename suffixes, lowercase, including the dot.
    pub extensions: &'static [&'static str],
    /// Case-sensitive substrings of the magic description.
    pub magic: &'static [&'static str],
    /// Literal prefix checked when no magic string matches.
    pub leading_bytes: Option<&'static [u8]>,
    /// Marker sets that veto this format when every marker of a set occurs
    /// anywhere in the content.
    pub exclusions: &'static [&'static [&'static [u8]]],
    /// Path-component prefixes the program is told to skip. The containment
    /// audit removes them as well in case the program did not.
    pub excluded_prefixes: &'static [&'static str],
    /// Password used when the caller supplies none. `None` means the
    /// template takes no password at all.
    pub default_password: Option<&'static str>,
    /// Suffix for the temporary source file when the input is not on disk.
    pub temp_suffix: &'static str,
    /// Program arguments with `{source}`, `{destination}` and `{password}`
    /// placeholders.
    pub args: &'static [&'static str],
}

// App-package (MSIX/APPX) containers are ZIPs that must not be unpacked here.
const APP_PACKAGE: &[&[u8]] = &[b"Registry.dat", b"AppxManifest.xml"];

pub static REGISTRY: [FormatDescriptor; 8] = [
    FormatDescriptor {
        format: Format::Zip,
        name: "zipfile",
        extensions: &[".zip"],
        magic: &["Zip archive data"],
        leading_bytes: Some(b"PK".as_slice()),
        exclusions: &[APP_PACKAGE],
        excluded_prefixes: &[],
        default_password: Some("infected"),
        temp_suffix: ".zip",
        args: &["x", "-y", "-mmt=off", "-p{password}", "-o{destination}", "{source}"],
    },
    FormatDescriptor {
        format: Format::SevenZip,
        name: "7zfile",
        extensions: &[".7z", ".iso", ".udf"],
        magic: &[
            "7-zip archive",
            "ISO 9660",
            "UDF filesystem data",
            "XZ compressed data",
        ],
        leading_bytes: None,
        exclusions: &[],
        excluded_prefixes: &[],
        default_password: Some(""),
        temp_suffix: ".7z",
        args: &["x", "-y", "-mmt=off", "-p{password}", "-o{destination}", "{source}"],
    },
    FormatDescriptor {
        format: Format::Gzip,
        name: "gzipfile",
        extensions: &[".gzip", ".gz"],
        magic: &["gzip compressed data, was"],
        leading_bytes: None,
        exclusions: &[],
        excluded_prefixes: &[],
        default_password: None,
        temp_suffix: ".gz",
        args: &["x", "-y", "-o{destination}", "{source}"],
    },
    FormatDescriptor {
        format: Format::Lzh,
        name: "lzhfile",
        extensions: &[".lzh", ".lha"],
        magic: &["LHa ("],
        leading_bytes: None,
        exclusions: &[],
        excluded_prefixes: &[],
        default_password: None,
        temp_suffix: ".lzh",
        args: &["x", "-y", "-o{destination}", "{source}"],
    },
    FormatDescriptor {
        format: Format::Vhd,
        name: "vhdfile",
        extensions: &[".vhd", ".vhdx"],
        magic: &["Microsoft Disk Image"],
        leading_bytes: None,
        exclusions: &[],
        excluded_prefixes: &["[SYSTEM]"],
        default_password: None,
        temp_suffix: ".vhd",
        args: &["x", "-y", "-xr![SYSTEM]*", "-o{destination}", "{source}"],
    },
    FormatDescriptor {
        format: Format::Wim,
        name: "wimfile",
        extensions: &[".wim"],
        magic: &["Windows imaging (WIM) image"],
        leading_bytes: None,
        exclusions: &[],
        excluded_prefixes: &[],
        default_password: None,
        temp_suffix: ".wim",
        args: &["x", "-y", "-o{destination}", "{source}"],
    },
    FormatDescriptor {
        format: Format::Xz,
        name: "xzfile",
        extensions: &[".xz"],
        magic: &["XZ compressed data"],
        leading_bytes: None,
        exclusions: &[],
        excluded_prefixes: &[],
        default_password: None,
        temp_suffix: ".xz",
        args: &["x", "-y", "-mmt=off", "-o{destination}", "{source}"],
    },
    FormatDescriptor {
        format: Format::Nsis,
        name: "nsis",
        extensions: &[".exe"],
        magic: &["Nullsoft Installer self-extracting archive"],
        leading_bytes: None,
        exclusions: &[],
        excluded_prefixes: &[],
        default_password: None,
        temp_suffix: ".exe",
        args: &["x", "-y", "-mmt=off", "-o{destination}", "{source}"],
    },
];

impl FormatDescriptor {
    /// Whether the declared filename ends with one of the registered extensions.
    pub fn matches_extension(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.extensions.iter().any(|ext| name.ends_with(ext))
    }

    pub fn matches_magic(&self, magic: &str) -> bool {
        self.magic.iter().any(|m| magic.contains(m))
    }

    pub fn matches_leading_bytes(&self, head: &[u8]) -> bool {
        self.leading_bytes.is_some_and(|lead| head.starts_with(lead))
    }

    /// Whether an exclusion marker set is fully present in `contents`.
    pub fn is_excluded(&self, contents: &[u8]) -> bool {
        self.exclusions.iter().any(|markers| {
            markers
                .iter()
                .all(|marker| crate::sniff::find(contents, marker).is_some())
        })
    }

    /// The password actually handed to the program: the caller's when
    /// non-empty, otherwise this format's default. `None` when the format
    /// takes no password.
    pub fn effective_password<'a>(&self, supplied: Option<&'a str>) -> Option<&'a str> {
        let default = self.default_password?;
        match supplied {
            Some(p) if !p.is_empty() => Some(p),
            _ => Some(default),
        }
    }

    /// Substitute the placeholders of the argument template.
    pub fn build_args(&self, source: &str, destination: &str, password: Option<&str>) -> Vec<String> {
        let password = self.effective_password(password).unwrap_or("");
        self.args
            .iter()
            .map(|token| {
                token
                    .replace(SOURCE, source)
                    .replace(DESTINATION, destination)
                    .replace(PASSWORD, password)
            })
            .collect()
    }
}

/// Descriptors with any positive evidence for `handle`, in registry order.
///
/// Produces candidates only: exclusions and precedence are applied by
/// [`detect`](crate::detect::detect).
pub fn descriptors_for(handle: &FileHandle) -> Result<Vec<&'static FormatDescriptor>, Error> {
    let magic = handle.magic()?;
    let head = handle.head(LEADING_WINDOW)?;

    Ok(REGISTRY
        .iter()
        .filter(|d| {
            handle.name().is_some_and(|n| d.matches_extension(n))
                || magic.is_some_and(|m| d.matches_magic(m))
                || d.matches_leading_bytes(&head)
        })
        .collect())
}

/// Bytes read for the literal leading-byte check.
pub const LEADING_WINDOW: usize = 8;
