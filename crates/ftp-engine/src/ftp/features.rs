//! FEAT feature matrix (RFC 2389).
//!
//! Queried once per session, right after the greeting. Every known feature
//! is always present in the matrix: not advertised means `false` / `None`.

use crate::ftp::types::Reply;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Optional server capabilities the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Epsv,
    Eprt,
    Mdtm,
    Size,
    Mlst,
    Mlsd,
    Auth,
    Rest,
    Pbsz,
    Prot,
    Utf8,
    Tvfs,
}

impl Feature {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Epsv => "EPSV",
            Self::Eprt => "EPRT",
            Self::Mdtm => "MDTM",
            Self::Size => "SIZE",
            Self::Mlst => "MLST",
            Self::Mlsd => "MLSD",
            Self::Auth => "AUTH",
            Self::Rest => "REST",
            Self::Pbsz => "PBSZ",
            Self::Prot => "PROT",
            Self::Utf8 => "UTF8",
            Self::Tvfs => "TVFS",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed FEAT response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMatrix {
    pub epsv: bool,
    pub eprt: bool,
    pub mdtm: bool,
    pub size: bool,
    pub mlsd: bool,
    pub pbsz: bool,
    pub prot: bool,
    pub utf8: bool,
    pub tvfs: bool,
    /// MLST fact names, in advertised order (`*` markers stripped).
    pub mlst: Option<Vec<String>>,
    /// AUTH mechanisms (`TLS`, `SSL`, …).
    pub auth: Option<Vec<String>>,
    /// REST types (`STREAM`, …).
    pub rest: Option<Vec<String>>,
    /// Feature lines as advertised, trimmed.
    pub raw: Vec<String>,
}

impl FeatureMatrix {
    /// Decode a `211` FEAT reply. The first (`Features:`) and last (`End`)
    /// lines are not features; anything else that is not a `211` yields an
    /// empty matrix.
    pub fn from_reply(reply: &Reply) -> Self {
        if reply.code != crate::ftp::commands::status::SYSTEM_STATUS {
            return Self::default();
        }
        let lines: Vec<&str> = reply.lines().collect();
        if lines.len() < 2 {
            return Self::default();
        }
        Self::from_lines(lines[1..lines.len() - 1].iter().copied())
    }

    /// Build the matrix from individual feature lines.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let raw: Vec<String> = lines
            .into_iter()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let has = |name: &str| find_line(&raw, name).is_some();
        let args = |name: &str| find_line(&raw, name).map(|l| arguments(l, name));

        let mlst: Option<Vec<String>> = args("MLST").map(|facts| {
            facts
                .split(';')
                .map(|f| f.trim().trim_end_matches('*'))
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        });
        let auth = args("AUTH").map(words);
        let rest = args("REST").map(words);

        Self {
            epsv: has("EPSV"),
            eprt: has("EPRT"),
            mdtm: has("MDTM"),
            size: has("SIZE"),
            mlsd: has("MLSD") || mlst.is_some(),
            pbsz: has("PBSZ"),
            prot: has("PROT"),
            utf8: has("UTF8"),
            tvfs: has("TVFS"),
            mlst,
            auth,
            rest,
            raw,
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Epsv => self.epsv,
            Feature::Eprt => self.eprt,
            Feature::Mdtm => self.mdtm,
            Feature::Size => self.size,
            Feature::Mlst => self.mlst.is_some(),
            Feature::Mlsd => self.mlsd,
            Feature::Auth => self.auth.is_some(),
            Feature::Rest => self.rest.is_some(),
            Feature::Pbsz => self.pbsz,
            Feature::Prot => self.prot,
            Feature::Utf8 => self.utf8,
            Feature::Tvfs => self.tvfs,
        }
    }

    /// Whether `AUTH TLS` is advertised.
    pub fn auth_tls(&self) -> bool {
        self.auth
            .as_ref()
            .map(|m| m.iter().any(|m| m.eq_ignore_ascii_case("TLS")))
            .unwrap_or(false)
    }
}

/// The advertised line whose first word is `name`.
fn find_line<'a>(raw: &'a [String], name: &str) -> Option<&'a str> {
    raw.iter().map(String::as_str).find(|l| {
        l.split_whitespace()
            .next()
            .map(|keyword| keyword.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    })
}

/// Everything after the feature keyword.
fn arguments<'a>(line: &'a str, name: &str) -> &'a str {
    line.get(name.len()..).unwrap_or("").trim()
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}
