use crate::manifest::{Author, DependencyDecl, Manifest, ManifestError, SapEntries, SapEntry};
use crate::range::{clean_version, VersionRange};
use url::Url;

/// Longest accepted package name, scope included.
pub const MAX_NAME_LEN: usize = 42;

/// License identifiers accepted in manifests. Matching is case-insensitive;
/// the canonical spelling below is what ends up in the normalized manifest.
pub const KNOWN_LICENSES: &[&str] = &[
    "0BSD",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "Apache-2.0",
    "Artistic-2.0",
    "BSD-2-Clause",
    "BSD-3-Clause",
    "BSL-1.0",
    "CC-BY-4.0",
    "CC0-1.0",
    "EPL-2.0",
    "EUPL-1.2",
    "GPL-2.0-only",
    "GPL-2.0-or-later",
    "GPL-3.0-only",
    "GPL-3.0-or-later",
    "ISC",
    "LGPL-2.1-only",
    "LGPL-2.1-or-later",
    "LGPL-3.0-only",
    "LGPL-3.0-or-later",
    "MIT",
    "MPL-2.0",
    "Unlicense",
    "UNLICENSED",
    "Zlib",
];

impl Manifest {
    /// Normalize the manifest.
    ///
    /// Identity fields are validated and fail hard; optional data that does
    /// not validate is dropped. The result is a fixed point: normalizing it
    /// again yields an equal manifest.
    pub fn normalize(&self, keep_runtime_fields: bool) -> Result<Manifest, ManifestError> {
        let name = normalize_name(&self.name)?;

        let raw_version = self.version.trim();
        if raw_version.is_empty() {
            return Err(ManifestError::EmptyVersion);
        }
        let version = clean_version(raw_version)
            .ok_or_else(|| ManifestError::InvalidVersion(self.version.clone()))?
            .to_string();

        Ok(Manifest {
            name,
            version,
            private: self.private,
            backwards_compatible: self.backwards_compatible,
            description: non_empty(self.description.as_deref()),
            git: self.git.as_deref().and_then(normalize_url),
            website: self.website.as_deref().and_then(normalize_url),
            license: self.license.as_deref().and_then(normalize_license),
            authors: self.authors.iter().filter_map(normalize_author).collect(),
            keywords: self
                .keywords
                .iter()
                .map(|k| strip_whitespace(k).to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            dependencies: self
                .dependencies
                .iter()
                .filter_map(normalize_dependency)
                .collect(),
            sap_entries: self.sap_entries.as_ref().and_then(normalize_sap_entries),
            dist_folder: non_empty(self.dist_folder.as_deref()),
            registry: if keep_runtime_fields {
                non_empty(self.registry.as_deref())
            } else {
                None
            },
        })
    }
}

/// Validate and canonicalize a package name (`name` or `@org/name`).
pub fn normalize_name(raw: &str) -> Result<String, ManifestError> {
    let name = strip_whitespace(raw).to_lowercase();
    if name.is_empty() {
        return Err(ManifestError::EmptyName);
    }
    let invalid = |reason: &str| ManifestError::InvalidName {
        name: name.clone(),
        reason: reason.to_owned(),
    };
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("must be at most 42 characters"));
    }

    let bare = match name.strip_prefix('@') {
        Some(scoped) => {
            let Some((org, bare)) = scoped.split_once('/') else {
                return Err(invalid("scoped names must look like @org/name"));
            };
            if org.is_empty() || !org.bytes().all(|b| b.is_ascii_lowercase()) {
                return Err(invalid("organization must match [a-z]+"));
            }
            bare
        }
        None => name.as_str(),
    };
    if bare.is_empty()
        || !bare
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(invalid("name must match [a-z0-9.-]+"));
    }
    Ok(name)
}

/// Resolve a license to its canonical identifier, or `None` if unknown.
pub fn normalize_license(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    KNOWN_LICENSES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(trimmed))
        .map(|known| (*known).to_owned())
}

/// Normalize a repository or website url; scheme-less input is read as https.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).ok()?;
    if !matches!(
        url.scheme(),
        "http" | "https" | "git" | "ssh" | "git+https" | "git+ssh"
    ) {
        return None;
    }
    url.host_str()?;
    Some(url.to_string())
}

pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn normalize_author(author: &Author) -> Option<Author> {
    let name = author.name.trim();
    if name.is_empty() {
        return None;
    }
    Some(Author {
        name: name.to_owned(),
        email: author
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| is_valid_email(e))
            .map(str::to_owned),
    })
}

fn normalize_dependency(dep: &DependencyDecl) -> Option<DependencyDecl> {
    let name = normalize_name(&dep.name).ok()?;
    let range = VersionRange::parse(&dep.version).ok()?;
    Some(DependencyDecl {
        name,
        version: range.to_string(),
        integrity: dep.integrity.trim().to_owned(),
        registry: non_empty(dep.registry.as_deref()),
    })
}

fn normalize_sap_entries(entries: &SapEntries) -> Option<SapEntries> {
    let mut out = SapEntries::new();
    for (table, records) in entries {
        let table = strip_whitespace(table).to_uppercase();
        if table.is_empty() {
            continue;
        }
        for record in records {
            let mut normalized = SapEntry::new();
            for (field, value) in record.fields() {
                let field = strip_whitespace(field).to_uppercase();
                if !field.is_empty() {
                    normalized.insert(field, value.trim());
                }
            }
            if !normalized.is_empty() {
                out.entry(table.clone()).or_default().push(normalized);
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
