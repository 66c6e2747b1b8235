/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Version grammar and release channels.
//!
//! A version string is `MAJOR.MINOR.PATCH` (each component up to five
//! decimal digits, no leading zeros) optionally followed by a channel
//! suffix: `-beta.N` for beta builds, `-dev.H` (H a short hex commit hash)
//! for development builds. The bare triple is the stable channel.
//!
//! This module only orders versions *within* a channel; cross-channel
//! ordering is encoded in the sort keys emitted by the version views.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub(crate) const DEV_SUFFIX: &str = "-dev.";
pub(crate) const BETA_SUFFIX: &str = "-beta.";

static VALID_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(0|[1-9][0-9]{0,4})\.(0|[1-9][0-9]{0,4})\.(0|[1-9][0-9]{0,4})(-dev\.[a-f0-9]{1,40}|-beta\.(0|[1-9][0-9]{0,4}))?$",
    )
    .expect("version regex is valid")
});

/// Release channel of a version, determined by its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Beta,
    Dev,
}

impl Channel {
    /// The wire literal for this channel.
    ///
    /// Total by construction: the enum is closed, so there is no "unknown
    /// channel" arm to fail on.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Dev => "dev",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = RegistryError;

    /// Channel literals are case-sensitive; anything else is `ChannelInvalid`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Channel::Stable),
            "beta" => Ok(Channel::Beta),
            "dev" => Ok(Channel::Dev),
            _ => Err(RegistryError::ChannelInvalid),
        }
    }
}

/// Check a version string against the accepted grammar.
pub fn is_valid_version(version: &str) -> bool {
    VALID_VERSION_RE.is_match(version)
}

/// Classify a version string by its channel suffix.
pub fn channel_of(version: &str) -> Channel {
    if version.contains(DEV_SUFFIX) {
        Channel::Dev
    } else if version.contains(BETA_SUFFIX) {
        Channel::Beta
    } else {
        Channel::Stable
    }
}

/// Split a version into its three numeric components, as decimal strings,
/// dropping any channel suffix.
pub fn split_version(version: &str) -> [&str; 3] {
    let base = match channel_of(version) {
        Channel::Beta => &version[..version.find(BETA_SUFFIX).unwrap_or(version.len())],
        Channel::Dev => &version[..version.find(DEV_SUFFIX).unwrap_or(version.len())],
        Channel::Stable => version,
    };
    let mut parts = base.splitn(3, '.');
    let major = parts.next().unwrap_or("");
    let minor = parts.next().unwrap_or("");
    let patch = parts.next().unwrap_or("");
    [major, minor, patch]
}

fn numeric_triple(version: &str) -> [u64; 3] {
    let [major, minor, patch] = split_version(version);
    [
        major.parse().unwrap_or(0),
        minor.parse().unwrap_or(0),
        patch.parse().unwrap_or(0),
    ]
}

/// Whether two versions share the same numeric triple, regardless of suffix.
///
/// Used to match a dev build against the base version declared in its
/// manifest.
pub fn version_match(ver1: &str, ver2: &str) -> bool {
    split_version(ver1) == split_version(ver2)
}

/// Strict numeric ordering of version triples. Suffixes are ignored.
pub fn version_less(ver1: &str, ver2: &str) -> bool {
    numeric_triple(ver1) < numeric_triple(ver2)
}
