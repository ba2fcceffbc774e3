use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use url::Url;

/// Where module bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    Path(PathBuf),
    /// `http`, `https` or `file` URL.
    Url(Url),
    /// Bytes the host already holds, with a name for diagnostics.
    Bytes { name: String, bytes: Arc<[u8]> },
}

impl ModuleSource {
    /// Classify a string: `http(s)://` and `file://` become URLs, anything
    /// else a filesystem path.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        let lower = input.to_ascii_lowercase();
        if ["http://", "https://", "file://"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            Ok(ModuleSource::Url(Url::parse(input)?))
        } else {
            Ok(ModuleSource::Path(PathBuf::from(input)))
        }
    }

    pub fn bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        ModuleSource::Bytes {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Resolve a relative path against `base`, the way a page-relative
    /// fetch is resolved against the page URL. Absolute paths, URLs and
    /// inline bytes are returned unchanged.
    pub fn resolve(&self, base: Option<&Url>) -> Result<Self, url::ParseError> {
        match (self, base) {
            (ModuleSource::Path(path), Some(base)) if path.is_relative() => {
                let joined = base.join(&path.to_string_lossy().replace('\\', "/"))?;
                Ok(ModuleSource::Url(joined))
            }
            _ => Ok(self.clone()),
        }
    }
}

impl FromStr for ModuleSource {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<PathBuf> for ModuleSource {
    fn from(path: PathBuf) -> Self {
        ModuleSource::Path(path)
    }
}

impl From<Url> for ModuleSource {
    fn from(url: Url) -> Self {
        ModuleSource::Url(url)
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleSource::Path(path) => write!(f, "{}", path.display()),
            ModuleSource::Url(url) => write!(f, "{url}"),
            ModuleSource::Bytes { name, bytes } => write!(f, "<{name}: {} bytes>", bytes.len()),
        }
    }
}
