// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Table locations and the scheme aliases object stores accept

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::{CodecError, Result};

/// Scheme spellings that address the same store
const SCHEME_ALIASES: &[(&str, &str)] = &[("s3a", "s3"), ("s3n", "s3")];

/// How restore spells the scheme of paths it writes back into metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemePolicy {
    /// Write the target location exactly as the caller gave it
    #[default]
    Preserve,
    /// Rewrite aliases such as `s3a` to their canonical scheme
    Canonical,
}

/// Canonical spelling of a URI scheme
#[must_use]
pub fn canonical_scheme(scheme: &str) -> String {
    let lower = scheme.to_ascii_lowercase();
    SCHEME_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map_or(lower, |(_, canonical)| (*canonical).to_string())
}

/// Apply scheme aliasing to a full URI, leaving the rest untouched
#[must_use]
pub fn canonicalize(uri: &str) -> Cow<'_, str> {
    match split_scheme(uri) {
        (Some(scheme), rest) => {
            let canonical = canonical_scheme(scheme);
            if canonical == scheme {
                Cow::Borrowed(uri)
            } else {
                Cow::Owned(format!("{canonical}://{rest}"))
            }
        }
        (None, _) => Cow::Borrowed(uri),
    }
}

/// True for paths carrying a scheme or starting at the filesystem root
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    split_scheme(path).0.is_some() || path.starts_with('/')
}

pub(crate) fn split_scheme(uri: &str) -> (Option<&str>, &str) {
    if let Some((scheme, rest)) = uri.split_once("://") {
        let valid = !scheme.is_empty()
            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            return (Some(scheme), rest);
        }
    }
    (None, uri)
}

/// The root URI of one table's files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation {
    scheme: Option<String>,
    rest: String,
    spelled: String,
}

impl TableLocation {
    pub fn parse(location: &str) -> Result<Self> {
        let (scheme, rest) = split_scheme(location.trim());
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(CodecError::InvalidLocation(location.to_string()));
        }
        let spelled = match scheme {
            Some(scheme) => format!("{scheme}://{rest}"),
            None => rest.to_string(),
        };
        Ok(Self {
            scheme: scheme.map(canonical_scheme),
            rest: rest.to_string(),
            spelled,
        })
    }

    /// The location as given, without a trailing slash
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.spelled
    }

    #[must_use]
    pub fn canonical(&self) -> String {
        match &self.scheme {
            Some(scheme) => format!("{scheme}://{}", self.rest),
            None => self.rest.clone(),
        }
    }

    #[must_use]
    pub fn spelled(&self, policy: SchemePolicy) -> Cow<'_, str> {
        match policy {
            SchemePolicy::Preserve => Cow::Borrowed(&self.spelled),
            SchemePolicy::Canonical => Cow::Owned(self.canonical()),
        }
    }

    /// Path relative to this location, if `path` lies under it.
    ///
    /// Scheme aliases compare equal, so `s3a://b/t/x` is under `s3://b/t`.
    #[must_use]
    pub fn relativize(&self, path: &str) -> Option<String> {
        let (scheme, rest) = split_scheme(path);
        if scheme.map(canonical_scheme) != self.scheme {
            return None;
        }
        let remainder = rest.strip_prefix(self.rest.as_str())?;
        if remainder.is_empty() {
            return Some(String::new());
        }
        remainder.strip_prefix('/').map(str::to_string)
    }

    #[must_use]
    pub fn join(&self, relative: &str, policy: SchemePolicy) -> String {
        let base = self.spelled(policy);
        if relative.is_empty() {
            base.into_owned()
        } else {
            format!("{base}/{relative}")
        }
    }
}

impl std::fmt::Display for TableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.spelled)
    }
}
