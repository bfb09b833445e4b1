use std::fs;
use std::path::Path;

use anyhow::Context;

/// Horn-polarity file patterns handed to `Dk2NuFlux` through a file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub fhc_pattern: String,
    pub rhc_pattern: String,
}

impl Manifest {
    pub fn new(fhc_pattern: impl Into<String>, rhc_pattern: impl Into<String>) -> Self {
        Self {
            fhc_pattern: fhc_pattern.into(),
            rhc_pattern: rhc_pattern.into(),
        }
    }

    /// One pattern per line, forward horn current first.
    pub fn render(&self) -> String {
        render_patterns([self.fhc_pattern.as_str(), self.rhc_pattern.as_str()])
    }

    /// Writes the manifest to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("writing file list at {}", path.display()))
    }
}

fn render_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> String {
    let mut rendered = String::new();
    for pattern in patterns {
        rendered.push_str(pattern);
        rendered.push('\n');
    }
    rendered
}
