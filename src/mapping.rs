//! Translation of paths between the namespaces seen by external services
//! (containers, remote hosts) and the local filesystem view.

use crate::config::{AppConfig, PathMapping};
use crate::error::Error;
use std::collections::HashMap;
use tracing::trace;

/// Outcome of a mapping lookup. Both variants carry a usable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedPath {
    Mapped(String),
    Unmapped(String),
}

impl MappedPath {
    pub fn path(&self) -> &str {
        match self {
            MappedPath::Mapped(p) | MappedPath::Unmapped(p) => p,
        }
    }

    pub fn into_path(self) -> String {
        match self {
            MappedPath::Mapped(p) | MappedPath::Unmapped(p) => p,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, MappedPath::Mapped(_))
    }
}

/// Ordered prefix mappings per source. The first configured entry whose
/// prefix matches wins.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    sources: HashMap<String, Vec<PathMapping>>,
    case_sensitive: bool,
}

impl PathMapper {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            sources: HashMap::new(),
            case_sensitive,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let mut mapper = PathMapper::new(config.case_sensitive_paths);
        for instance in &config.arr {
            mapper.add_source(&instance.name, instance.path_mappings.clone())?;
        }
        if let Some(torrent) = &config.torrent {
            mapper.add_source(&torrent.name, torrent.path_mappings.clone())?;
        }
        Ok(mapper)
    }

    pub fn add_source(&mut self, source: &str, mappings: Vec<PathMapping>) -> Result<(), Error> {
        for mapping in &mappings {
            mapping.check()?;
        }
        self.sources
            .entry(source.to_string())
            .or_default()
            .extend(mappings);
        Ok(())
    }

    pub fn with_source(mut self, source: &str, mappings: Vec<PathMapping>) -> Result<Self, Error> {
        self.add_source(source, mappings)?;
        Ok(self)
    }

    pub fn mappings(&self, source: &str) -> &[PathMapping] {
        self.sources.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Map `external_path` as seen by `source` into the local namespace.
    pub fn map(&self, source: &str, external_path: &str) -> MappedPath {
        let path = normalize_path(external_path);
        for mapping in self.mappings(source) {
            let prefix = normalize_path(&mapping.external);
            if let Some(rest) = self.strip_component_prefix(&path, &prefix) {
                let local = normalize_path(&mapping.local);
                let mapped = join_remainder(&local, rest);
                trace!("[{}] mapped {} -> {}", source, path, mapped);
                return MappedPath::Mapped(mapped);
            }
        }
        MappedPath::Unmapped(path)
    }

    /// The form used for exact path equality between records and catalog.
    pub fn match_key(&self, path: &str) -> String {
        let normalized = normalize_path(path);
        if self.case_sensitive {
            normalized
        } else {
            normalized.to_lowercase()
        }
    }

    fn strip_component_prefix<'a>(&self, path: &'a str, prefix: &str) -> Option<&'a str> {
        if prefix == "/" {
            return Some(path);
        }
        if path.len() < prefix.len() || !path.is_char_boundary(prefix.len()) {
            return None;
        }
        let (head, rest) = path.split_at(prefix.len());
        let matches = if self.case_sensitive {
            head == prefix
        } else {
            head.eq_ignore_ascii_case(prefix)
        };
        if matches && (rest.is_empty() || rest.starts_with('/')) {
            Some(rest)
        } else {
            None
        }
    }
}

fn join_remainder(local: &str, rest: &str) -> String {
    if rest.is_empty() {
        local.to_string()
    } else if local == "/" {
        rest.to_string()
    } else {
        format!("{}{}", local, rest)
    }
}

/// Collapses repeated and trailing separators and converts backslashes.
/// The root itself stays `/`.
pub fn normalize_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let absolute = path.starts_with('/');
    let joined = path
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", joined),
        (false, _) => joined,
    }
}

/// Resolves `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &str) -> String {
    let normalized = normalize_path(path);
    let absolute = normalized.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/').filter(|p| !p.is_empty()) {
        match part {
            "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// True when `path` lies at or below `root` by path components alone.
pub fn is_lexically_under(path: &str, root: &str) -> bool {
    let path = lexical_normalize(path);
    let root = lexical_normalize(root);
    if root == "/" {
        return path.starts_with('/');
    }
    path == root || path.starts_with(&format!("{}/", root))
}
