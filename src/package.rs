//! Package identity and RPM version ordering.
//!
//! A [`Package`] is identified by name, version, release and architecture.
//! The epoch is carried along for EVR comparison but does not take part in
//! identity: two services listing the same NVRA list the same package.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Architecture assumed when a package string carries none.
pub const SOURCE_ARCH: &str = "src";

/// Architectures recognised as the trailing `.arch` of a package string.
pub const KNOWN_ARCHES: &[&str] = &[
    "src", "noarch", "x86_64", "i686", "i386", "aarch64", "ppc64le", "ppc64", "s390x",
    "armv7hl",
];

/// A single buildable/taggable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Package {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Package {
    /// Creates a source package with epoch 0.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            epoch: 0,
            version: version.into(),
            release: release.into(),
            arch: SOURCE_ARCH.to_string(),
        }
    }

    /// Sets the architecture.
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Sets the epoch.
    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    /// Parses `name-[epoch:]version-release[.arch]`.
    ///
    /// The trailing dot-separated component is taken as the architecture only
    /// when it is one of [`KNOWN_ARCHES`]; otherwise it belongs to the release
    /// (`1.el7`) and the package is a source package.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidPackage(input.to_string());
        let input_trimmed = input.trim();

        let (rest, release_arch) = input_trimmed.rsplit_once('-').ok_or_else(invalid)?;
        let (name, epoch_version) = rest.rsplit_once('-').ok_or_else(invalid)?;

        let (release, arch) = match release_arch.rsplit_once('.') {
            Some((release, arch)) if KNOWN_ARCHES.contains(&arch) => (release, arch),
            _ => (release_arch, SOURCE_ARCH),
        };

        let (epoch, version) = match epoch_version.split_once(':') {
            Some((epoch, version)) => (epoch.parse::<u32>().map_err(|_| invalid())?, version),
            None => (0, epoch_version),
        };

        if name.is_empty() || version.is_empty() || release.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            name: name.to_string(),
            epoch,
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        })
    }

    /// `name-version-release`.
    pub fn nvr(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    /// `name-epoch:version-release.arch`.
    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }

    /// Compares epoch, version and release using the RPM rules.
    pub fn cmp_evr(&self, other: &Package) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_versions(&self.version, &other.version))
            .then_with(|| compare_versions(&self.release, &other.release))
    }

    /// Whether `other` is the same package line (name and arch) at an equal
    /// or newer EVR.
    pub fn is_superseded_by(&self, other: &Package) -> bool {
        self.name == other.name
            && self.arch == other.arch
            && other.cmp_evr(self) != Ordering::Less
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.release == other.release
            && self.arch == other.arch
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.release.hash(state);
        self.arch.hash(state);
    }
}

impl Ord for Package {
    fn cmp(&self, other: &Self) -> Ordering {
        // The raw string tie-breaks keep `Ord` consistent with `Eq` for
        // versions rpm considers equal ("1.0" vs "1.00").
        self.name
            .cmp(&other.name)
            .then_with(|| compare_versions(&self.version, &other.version))
            .then_with(|| compare_versions(&self.release, &other.release))
            .then_with(|| self.arch.cmp(&other.arch))
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.release.cmp(&other.release))
    }
}

impl PartialOrd for Package {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch == 0 {
            write!(
                f,
                "{}-{}-{}.{}",
                self.name, self.version, self.release, self.arch
            )
        } else {
            write!(
                f,
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        }
    }
}

impl FromStr for Package {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Package::parse(s)
    }
}

impl TryFrom<String> for Package {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Package::parse(&value)
    }
}

impl From<Package> for String {
    fn from(package: Package) -> Self {
        package.to_string()
    }
}

/// Compares two version (or release) strings the way `rpmvercmp` does.
///
/// Strings are split into alternating numeric and alphabetic segments;
/// numeric segments compare numerically and beat alphabetic ones, `~` sorts
/// before anything (pre-releases) and `^` after the base version.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        one = skip_separators(one);
        two = skip_separators(two);

        if one.first() == Some(&b'~') || two.first() == Some(&b'~') {
            if one.first() != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.first() == Some(&b'^') || two.first() == Some(&b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one[0] != b'^' {
                return Ordering::Greater;
            }
            if two[0] != b'^' {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let len_one = segment_len(one, numeric);
        let len_two = segment_len(two, numeric);

        // Segment types differ: numeric is newer than alphabetic.
        if len_two == 0 {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let (seg_one, seg_two) = (&one[..len_one], &two[..len_two]);
        let ordering = if numeric {
            let seg_one = strip_leading_zeros(seg_one);
            let seg_two = strip_leading_zeros(seg_two);
            seg_one
                .len()
                .cmp(&seg_two.len())
                .then_with(|| seg_one.cmp(seg_two))
        } else {
            seg_one.cmp(seg_two)
        };

        if ordering != Ordering::Equal {
            return ordering;
        }

        one = &one[len_one..];
        two = &two[len_two..];
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, _) => Ordering::Greater,
    }
}

fn skip_separators(mut s: &[u8]) -> &[u8] {
    while let Some(&c) = s.first() {
        if c.is_ascii_alphanumeric() || c == b'~' || c == b'^' {
            break;
        }
        s = &s[1..];
    }
    s
}

fn segment_len(s: &[u8], numeric: bool) -> usize {
    s.iter()
        .take_while(|c| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        })
        .count()
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let zeros = s.iter().take_while(|&&c| c == b'0').count();
    &s[zeros..]
}
