//! Module resolution for `import X from 'path'`.
//!
//! The loader turns an import specifier into a canonical path plus the file
//! contents. Each resolved module compiles into exactly one function-scope
//! lambda; the parser keeps a path-keyed registry so a module imported from
//! several places (or from itself, through a cycle) compiles once.

use std::{fs, path::PathBuf};

/// Resolves import specifiers against an ordered search-path list.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleLoader {
    paths: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Resolves and reads a module, returning the canonical registry key and
    /// the source text. The bare specifier is tried first, then each search
    /// path in order.
    pub fn load(&self, specifier: &str) -> Result<(String, String), String> {
        let mut candidates = vec![PathBuf::from(specifier)];
        if !candidates[0].is_absolute() {
            candidates.extend(self.paths.iter().map(|base| base.join(specifier)));
        }
        for path in &candidates {
            if let Ok(source) = fs::read_to_string(path) {
                let key = path
                    .canonicalize()
                    .map_or_else(|_| path.to_string_lossy().into_owned(), |p| p.to_string_lossy().into_owned());
                return Ok((key, source));
            }
        }
        Err(format!("cannot find module \"{specifier}\""))
    }
}
