//! Conda archive URL decomposition.
//!
//! A conda package URL ends in `<channel>/<subdir>/<name>-<version>-<build>.<ext>`
//! where `<ext>` is `conda` or `tar.bz2`. Name, version and build are
//! recovered by splitting the stem from the right, since names may contain
//! dashes but versions and builds may not.

const ARCHIVE_EXTENSIONS: &[&str] = &[".conda", ".tar.bz2"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondaArchive<'a> {
    pub channel: Option<&'a str>,
    pub subdir: Option<&'a str>,
    pub name: &'a str,
    pub version: &'a str,
    pub build: &'a str,
}

pub fn parse_conda_url(url: &str) -> Option<CondaArchive<'_>> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let (dir, file_name) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };

    let stem = ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))?;

    let mut parts = stem.rsplitn(3, '-');
    let build = parts.next()?;
    let version = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() || version.is_empty() || build.is_empty() {
        return None;
    }

    let (channel, subdir) = match dir.and_then(|d| d.rsplit_once('/')) {
        Some((channel, subdir)) if !subdir.is_empty() => (Some(channel), Some(subdir)),
        _ => (None, dir),
    };

    Some(CondaArchive {
        channel,
        subdir,
        name,
        version,
        build,
    })
}
