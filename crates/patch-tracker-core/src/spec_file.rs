//! RPM packaging descriptor rewriting.
//!
//! [`update_spec`] is a pure text transformation: it appends `PatchNNNN:`
//! declarations (continuing the highest existing index), mirrors them as
//! `%patchNNNN -p1` apply lines when the descriptor applies patches one by
//! one, bumps `Release:` and prepends a `%changelog` entry.

use std::collections::BTreeMap;

/// Sections that end the preamble.
const SECTIONS: &[&str] = &[
    "%description",
    "%package",
    "%prep",
    "%build",
    "%install",
    "%check",
    "%clean",
    "%files",
    "%pre",
    "%post",
    "%preun",
    "%postun",
    "%changelog",
];

/// Structural problems found while rewriting. None of them stops the
/// rewrite; callers surface them as warnings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecAnomaly {
    #[error("no %changelog section, a new one is appended")]
    MissingChangelog,

    #[error("no {0} tag")]
    MissingTag(&'static str),

    #[error("no Source line, patch declarations placed before the first section")]
    MissingSource,

    #[error("Release {0:?} has no leading number and was not bumped")]
    UnbumpableRelease(String),
}

/// A tag value and the byte offset where it starts in its line.
#[derive(Debug, Clone, Copy)]
struct TagValue<'a> {
    offset: usize,
    value: &'a str,
}

/// Match `<name>[digits]<ws>:<value>` case-insensitively at the start of
/// `line`. Returns the digits (if any) and the value.
fn parse_tag<'a>(line: &'a str, name: &str, numbered: bool) -> Option<(Option<u32>, TagValue<'a>)> {
    let trimmed = line.trim_start();
    let head = trimmed.get(..name.len())?;
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = &trimmed[name.len()..];

    let digit_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digit_len > 0 && !numbered {
        return None;
    }
    let number = if digit_len > 0 {
        Some(rest[..digit_len].parse().ok()?)
    } else {
        None
    };

    let rest = rest[digit_len..].trim_start();
    let value = rest.strip_prefix(':')?;
    let value = value.trim_start();
    let offset = line.len() - value.len();
    Some((
        number,
        TagValue {
            offset,
            value: value.trim_end(),
        },
    ))
}

/// `%patchN` / `%patch -P N` apply lines.
fn is_apply_line(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("%patch")
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_digit() || c.is_whitespace()))
}

fn is_section(line: &str) -> bool {
    let word = line.split_whitespace().next().unwrap_or("");
    SECTIONS.contains(&word)
}

/// Increment the leading integer of a Release value (`3%{?dist}` becomes
/// `4%{?dist}`).
fn bump_release(release: &str) -> Option<String> {
    let digits = release.bytes().take_while(u8::is_ascii_digit).count();
    let n: u64 = release.get(..digits)?.parse().ok()?;
    Some(format!("{}{}", n + 1, &release[digits..]))
}

/// A parsed packaging descriptor.
#[derive(Debug, Clone)]
pub struct SpecFile<'a> {
    lines: Vec<&'a str>,
    patch_tags: Vec<(usize, u32)>,
    last_apply: Option<usize>,
    last_source: Option<usize>,
    first_section: Option<usize>,
    changelog: Option<usize>,
    version: Option<&'a str>,
    release: Option<(usize, TagValue<'a>)>,
    has_name: bool,
}

impl<'a> SpecFile<'a> {
    pub fn parse(text: &'a str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let mut spec = SpecFile {
            lines: Vec::new(),
            patch_tags: Vec::new(),
            last_apply: None,
            last_source: None,
            first_section: None,
            changelog: None,
            version: None,
            release: None,
            has_name: false,
        };

        for (idx, line) in lines.iter().copied().enumerate() {
            if let Some((number, _)) = parse_tag(line, "Patch", true) {
                spec.patch_tags.push((idx, number.unwrap_or(0)));
            } else if parse_tag(line, "Source", true).is_some() {
                spec.last_source = Some(idx);
            } else if is_apply_line(line) {
                spec.last_apply = Some(idx);
            } else if is_section(line) {
                spec.first_section.get_or_insert(idx);
                if line.trim_start().starts_with("%changelog") && spec.changelog.is_none() {
                    spec.changelog = Some(idx);
                }
            } else if spec.first_section.is_none() {
                if parse_tag(line, "Name", false).is_some() {
                    spec.has_name = true;
                } else if let Some((_, v)) = parse_tag(line, "Version", false) {
                    spec.version.get_or_insert(v.value);
                } else if let Some((_, v)) = parse_tag(line, "Release", false) {
                    spec.release.get_or_insert((idx, v));
                }
            }
        }
        spec.lines = lines;
        spec
    }

    /// Highest declared patch index, 0 when there is none.
    pub fn max_patch_index(&self) -> u32 {
        self.patch_tags.iter().map(|(_, n)| *n).max().unwrap_or(0)
    }

    pub fn anomalies(&self) -> Vec<SpecAnomaly> {
        let mut found = Vec::new();
        if !self.has_name {
            found.push(SpecAnomaly::MissingTag("Name"));
        }
        if self.version.is_none() {
            found.push(SpecAnomaly::MissingTag("Version"));
        }
        match &self.release {
            None => found.push(SpecAnomaly::MissingTag("Release")),
            Some((_, r)) if bump_release(r.value).is_none() => {
                found.push(SpecAnomaly::UnbumpableRelease(r.value.to_string()))
            }
            Some(_) => {}
        }
        if self.last_source.is_none() {
            found.push(SpecAnomaly::MissingSource);
        }
        if self.changelog.is_none() {
            found.push(SpecAnomaly::MissingChangelog);
        }
        found
    }

    /// Render the descriptor with `patches` declared and a changelog entry
    /// titled `title` with body `note`.
    pub fn update(&self, title: &str, note: &str, patches: &[String]) -> String {
        let len = self.lines.len();
        // Lines to insert before original line `k` (k == len means at the end).
        let mut inserts: BTreeMap<usize, Vec<String>> = BTreeMap::new();

        // Widened so a declared `Patch4294967295` still has a successor.
        let first_index = u64::from(self.max_patch_index()) + 1;
        let numbered: Vec<(u64, &String)> = (first_index..).zip(patches).collect();

        if !numbered.is_empty() {
            let at = match (self.patch_tags.last(), self.last_source, self.first_section) {
                (Some((idx, _)), _, _) => idx + 1,
                (None, Some(idx), _) => idx + 1,
                (None, None, Some(idx)) => idx,
                (None, None, None) => len,
            };
            let slot = inserts.entry(at).or_default();
            slot.extend(
                numbered
                    .iter()
                    .map(|(n, file)| format!("Patch{n:04}: {file}")),
            );

            if let Some(idx) = self.last_apply {
                let slot = inserts.entry(idx + 1).or_default();
                slot.extend(numbered.iter().map(|(n, _)| format!("%patch{n:04} -p1")));
            }
        }

        let bumped = self
            .release
            .as_ref()
            .and_then(|(idx, r)| bump_release(r.value).map(|new| (*idx, r.offset, new)));

        let header = match (&self.version, &bumped) {
            (Some(version), Some((_, _, release))) => {
                let release = release.split('%').next().unwrap_or(release);
                format!("* {title} - {version}-{release}")
            }
            _ => format!("* {title}"),
        };
        let mut entry = vec![header, format!("- {note}")];

        if let Some(idx) = self.changelog {
            let next_is_entry = self
                .lines
                .get(idx + 1)
                .is_some_and(|l| !l.trim().is_empty());
            if next_is_entry {
                entry.push(String::new());
            }
            inserts.entry(idx + 1).or_default().extend(entry.drain(..));
        }

        let mut out: Vec<String> = Vec::with_capacity(len + patches.len() * 2 + 4);
        for (k, line) in self.lines.iter().enumerate() {
            if let Some(extra) = inserts.remove(&k) {
                out.extend(extra);
            }
            match &bumped {
                Some((idx, offset, release)) if *idx == k => {
                    out.push(format!("{}{}", &line[..*offset], release));
                }
                _ => out.push((*line).to_string()),
            }
        }
        if let Some(extra) = inserts.remove(&len) {
            out.extend(extra);
        }

        if !entry.is_empty() {
            if out.last().is_some_and(|l| !l.trim().is_empty()) {
                out.push(String::new());
            }
            out.push("%changelog".to_string());
            out.extend(entry);
        }

        let mut text = out.join("\n");
        text.push('\n');
        text
    }
}

/// Rewrite `existing` with `patches` declared and a changelog entry added.
pub fn update_spec(title: &str, note: &str, patches: &[String], existing: &str) -> String {
    SpecFile::parse(existing).update(title, note, patches)
}
