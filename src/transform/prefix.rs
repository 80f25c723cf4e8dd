//! Vendor prefixing driven by a browser compatibility list.
//!
//! Entries look like `chrome >= 34` or `android >= 4.1`. A declaration gets
//! a vendor-prefixed copy when at least one targeted browser version still
//! needs the prefix for that property.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Browser {
    Ie,
    IeMobile,
    Firefox,
    Chrome,
    Safari,
    Opera,
    Ios,
    Android,
    BlackBerry,
}

impl Browser {
    fn vendor(self) -> Vendor {
        match self {
            Browser::Ie | Browser::IeMobile => Vendor::Ms,
            Browser::Firefox => Vendor::Moz,
            _ => Vendor::Webkit,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "ie" | "explorer" => Browser::Ie,
            "ie_mob" | "iemobile" => Browser::IeMobile,
            "ff" | "firefox" => Browser::Firefox,
            "chrome" => Browser::Chrome,
            "safari" => Browser::Safari,
            "opera" => Browser::Opera,
            "ios" | "ios_saf" => Browser::Ios,
            "android" => Browser::Android,
            "bb" | "blackberry" => Browser::BlackBerry,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Vendor {
    Webkit,
    Moz,
    Ms,
}

impl Vendor {
    fn prefix(self) -> &'static str {
        match self {
            Vendor::Webkit => "-webkit-",
            Vendor::Moz => "-moz-",
            Vendor::Ms => "-ms-",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u32, pub u32);

impl Version {
    /// A version the unprefixed property never shipped in.
    const NEVER: Version = Version(u32::MAX, 0);
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

/// Oldest version of a browser that has to be supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub browser: Browser,
    pub min: Version,
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Browser(s.to_string());

        let mut parts = s.split_whitespace();
        let (Some(name), Some(op), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let browser = Browser::parse(name).ok_or_else(invalid)?;

        let (major, minor) = version.split_once('.').unwrap_or((version, "0"));
        let major: u32 = major.parse().map_err(|_| invalid())?;
        let minor: u32 = minor.parse().map_err(|_| invalid())?;

        let min = match op {
            ">=" => Version(major, minor),
            ">" => Version(major, minor.checked_add(1).ok_or_else(invalid)?),
            _ => return Err(invalid()),
        };

        Ok(Target { browser, min })
    }
}

/// First version of each browser supporting the unprefixed property.
/// Browsers missing from a row never needed a prefix for it.
const SUPPORT: &[(&str, &[(Browser, Version)])] = &[
    (
        "transform",
        &[
            (Browser::Ie, Version(10, 0)),
            (Browser::Firefox, Version(16, 0)),
            (Browser::Chrome, Version(36, 0)),
            (Browser::Safari, Version(9, 0)),
            (Browser::Opera, Version(23, 0)),
            (Browser::Ios, Version(9, 0)),
            (Browser::Android, Version(5, 0)),
            (Browser::BlackBerry, Version(11, 0)),
        ],
    ),
    (
        "transform-origin",
        &[
            (Browser::Ie, Version(10, 0)),
            (Browser::Firefox, Version(16, 0)),
            (Browser::Chrome, Version(36, 0)),
            (Browser::Safari, Version(9, 0)),
            (Browser::Opera, Version(23, 0)),
            (Browser::Ios, Version(9, 0)),
            (Browser::Android, Version(5, 0)),
            (Browser::BlackBerry, Version(11, 0)),
        ],
    ),
    (
        "transition",
        &[
            (Browser::Firefox, Version(16, 0)),
            (Browser::Chrome, Version(26, 0)),
            (Browser::Safari, Version(7, 0)),
            (Browser::Ios, Version(7, 0)),
            (Browser::Android, Version(4, 4)),
            (Browser::BlackBerry, Version(11, 0)),
        ],
    ),
    (
        "animation",
        &[
            (Browser::Firefox, Version(16, 0)),
            (Browser::Chrome, Version(43, 0)),
            (Browser::Safari, Version(9, 0)),
            (Browser::Opera, Version(30, 0)),
            (Browser::Ios, Version(9, 0)),
            (Browser::Android, Version(5, 0)),
            (Browser::BlackBerry, Version(11, 0)),
        ],
    ),
    (
        "user-select",
        &[
            (Browser::Ie, Version::NEVER),
            (Browser::IeMobile, Version::NEVER),
            (Browser::Firefox, Version(69, 0)),
            (Browser::Chrome, Version(54, 0)),
            (Browser::Safari, Version::NEVER),
            (Browser::Opera, Version(41, 0)),
            (Browser::Ios, Version::NEVER),
            (Browser::Android, Version(54, 0)),
            (Browser::BlackBerry, Version::NEVER),
        ],
    ),
    (
        "appearance",
        &[
            (Browser::Firefox, Version(80, 0)),
            (Browser::Chrome, Version(84, 0)),
            (Browser::Safari, Version(15, 4)),
            (Browser::Opera, Version(70, 0)),
            (Browser::Ios, Version(15, 4)),
            (Browser::Android, Version(84, 0)),
            (Browser::BlackBerry, Version::NEVER),
        ],
    ),
    (
        "backface-visibility",
        &[
            (Browser::Firefox, Version(16, 0)),
            (Browser::Chrome, Version(36, 0)),
            (Browser::Safari, Version(15, 4)),
            (Browser::Opera, Version(23, 0)),
            (Browser::Ios, Version(15, 4)),
            (Browser::Android, Version(5, 0)),
            (Browser::BlackBerry, Version::NEVER),
        ],
    ),
    (
        "hyphens",
        &[
            (Browser::Ie, Version::NEVER),
            (Browser::IeMobile, Version::NEVER),
            (Browser::Firefox, Version(43, 0)),
            (Browser::Safari, Version(17, 0)),
            (Browser::Ios, Version(17, 0)),
        ],
    ),
    (
        "box-sizing",
        &[
            (Browser::Firefox, Version(29, 0)),
            (Browser::Chrome, Version(10, 0)),
            (Browser::Safari, Version(5, 1)),
            (Browser::Ios, Version(5, 0)),
            (Browser::Android, Version(4, 0)),
        ],
    ),
];

/// Prefixes every declaration has to be duplicated with, ordered webkit,
/// moz, ms.
pub fn prefixes_for(property: &str, targets: &[Target]) -> Vec<&'static str> {
    let Some((_, support)) = SUPPORT.iter().find(|(name, _)| *name == property) else {
        return Vec::new();
    };

    let mut vendors: Vec<Vendor> = targets
        .iter()
        .filter(|target| {
            support
                .iter()
                .any(|(browser, since)| *browser == target.browser && target.min < *since)
        })
        .map(|target| target.browser.vendor())
        .collect();

    vendors.sort();
    vendors.dedup();
    vendors.into_iter().map(Vendor::prefix).collect()
}

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*)([a-z][a-z-]*)[ \t]*:([^;{}\n]*);").expect("valid declaration regex")
});

/// Adds vendor-prefixed copies in front of declarations that need them.
///
/// Works on expanded output, one declaration per line.
pub fn prefix<'a>(css: &'a str, targets: &[Target]) -> Cow<'a, str> {
    DECLARATION.replace_all(css, |caps: &Captures| {
        let indent = &caps[1];
        let property = &caps[2];
        let value = &caps[3];

        let mut out = String::new();
        for vendor in prefixes_for(property, targets) {
            out.push_str(&format!("{indent}{vendor}{property}:{value};\n"));
        }
        out.push_str(&caps[0]);
        out
    })
}
