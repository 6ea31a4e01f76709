use regex::Regex;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::ZipArchive;

use crate::types::{ProductError, ProductResult};

/// Storage location of a product: an unpacked directory or a zip archive.
///
/// Members are addressed by their `/`-separated path relative to the
/// product root (directories) or by their archive entry name (zip).
#[derive(Debug, Clone)]
pub enum ProductSource {
    Directory { root: PathBuf, members: Vec<String> },
    Zip { path: PathBuf, members: Vec<String> },
}

impl ProductSource {
    /// Open a product location and index its members
    pub fn open<P: AsRef<Path>>(path: P) -> ProductResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(ProductError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )));
        }

        if path.is_dir() {
            let mut members = Vec::new();
            list_directory(&path, &path, &mut members)?;
            members.sort();
            log::debug!("Indexed {} files under {}", members.len(), path.display());
            return Ok(ProductSource::Directory { root: path, members });
        }

        let is_zip = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if !is_zip {
            return Err(ProductError::Archive(format!(
                "{} is neither a directory nor a zip archive",
                path.display()
            )));
        }

        let mut archive = open_zip(&path)?;
        let mut members = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive
                .by_index(i)
                .map_err(|e| ProductError::Archive(format!("Failed to access file {}: {}", i, e)))?;
            if !file.is_dir() {
                members.push(file.name().to_string());
            }
        }
        members.sort();
        log::debug!("Indexed {} members in {}", members.len(), path.display());
        Ok(ProductSource::Zip { path, members })
    }

    pub fn path(&self) -> &Path {
        match self {
            ProductSource::Directory { root, .. } => root,
            ProductSource::Zip { path, .. } => path,
        }
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, ProductSource::Zip { .. })
    }

    pub fn members(&self) -> &[String] {
        match self {
            ProductSource::Directory { members, .. } | ProductSource::Zip { members, .. } => members,
        }
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members().iter().any(|m| m == member)
    }

    /// Members whose path matches `pattern`, sorted
    pub fn find(&self, pattern: &str) -> ProductResult<Vec<String>> {
        let re = Regex::new(pattern)
            .map_err(|e| ProductError::Archive(format!("invalid member pattern '{}': {}", pattern, e)))?;
        Ok(self
            .members()
            .iter()
            .filter(|m| re.is_match(m))
            .cloned()
            .collect())
    }

    /// First member matching `pattern`
    pub fn find_one(&self, pattern: &str) -> ProductResult<String> {
        self.find(pattern)?.into_iter().next().ok_or_else(|| {
            ProductError::Archive(format!(
                "no file matching '{}' in {}",
                pattern,
                self.path().display()
            ))
        })
    }

    /// Glob-style search (`*`, `**`, `?`) over member paths
    pub fn glob(&self, pattern: &str) -> ProductResult<Vec<String>> {
        self.find(&glob_to_regex(pattern))
    }

    pub fn read_bytes(&self, member: &str) -> ProductResult<Vec<u8>> {
        match self {
            ProductSource::Directory { root, .. } => Ok(fs::read(root.join(member))?),
            ProductSource::Zip { path, .. } => {
                let mut archive = open_zip(path)?;
                let mut file = archive
                    .by_name(member)
                    .map_err(|e| ProductError::Archive(format!("Failed to find {}: {}", member, e)))?;
                let mut buffer = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut buffer)?;
                Ok(buffer)
            }
        }
    }

    pub fn read_to_string(&self, member: &str) -> ProductResult<String> {
        let bytes = self.read_bytes(member)?;
        String::from_utf8(bytes)
            .map_err(|e| ProductError::Archive(format!("{} is not valid UTF-8: {}", member, e)))
    }

    /// Path a raster library can open directly. Archive members use the
    /// `/vsizip/` virtual path scheme, so nothing is extracted.
    pub fn raster_path(&self, member: &str) -> String {
        match self {
            ProductSource::Directory { root, .. } => root.join(member).to_string_lossy().into_owned(),
            ProductSource::Zip { path, .. } => format!("/vsizip/{}/{}", path.display(), member),
        }
    }

    /// Run `f` on a real filesystem path of `member`.
    ///
    /// Archive members are extracted into a temporary directory which is
    /// removed as soon as `f` returns, whether it succeeded or not.
    pub fn with_extracted<T, F>(&self, member: &str, f: F) -> ProductResult<T>
    where
        F: FnOnce(&Path) -> ProductResult<T>,
    {
        match self {
            ProductSource::Directory { root, .. } => f(&root.join(member)),
            ProductSource::Zip { .. } => {
                let tmp_dir = TempDir::new()?;
                let file_name = Path::new(member)
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "member".into());
                let target = tmp_dir.path().join(file_name);
                fs::write(&target, self.read_bytes(member)?)?;
                log::debug!("Extracted {} to {}", member, target.display());
                let result = f(&target);
                drop(tmp_dir);
                result
            }
        }
    }
}

fn open_zip(path: &Path) -> ProductResult<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| ProductError::Archive(format!("Failed to open ZIP: {}", e)))
}

fn list_directory(root: &Path, dir: &Path, members: &mut Vec<String>) -> ProductResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            list_directory(root, &path, members)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            members.push(parts.join("/"));
        }
    }
    Ok(())
}

/// Translate a glob into an anchored regex over `/`-separated paths
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
