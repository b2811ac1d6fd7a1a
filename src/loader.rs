//! Resource loading for sandboxed pages.
//!
//! Everything a sandbox reads comes from the website output root. Absolute
//! URLs (`scheme:` or `//host`) are rejected before the filesystem is touched,
//! so page builds never reach the network.

use crate::error::{Error, Result};
use deno_core::{
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier, ModuleType,
    RequestedModuleType, ResolutionKind,
};
use std::borrow::Cow;
use std::io;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Returns true if `url` carries a scheme (`http:`, `data:`, `c:`) or is
/// protocol-relative (`//host/...`, including backslash variants).
pub fn is_absolute_url(url: &str) -> bool {
    let bytes = url.as_bytes();
    if bytes.len() >= 2 && matches!(bytes[0], b'/' | b'\\') && matches!(bytes[1], b'/' | b'\\') {
        return true;
    }
    Url::parse(url).is_ok()
}

/// Bytes read from the output root.
///
/// A single read backs both shapes a fetch consumer asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    bytes: Vec<u8>,
}

impl Resource {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// UTF-8 view of the bytes. Invalid sequences become U+FFFD.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Serves relative URLs from a fixed website output root.
///
/// Containment is checked lexically, not via canonicalization, so symlinked
/// asset trees under the root (`static/`, `data/`) stay reachable.
#[derive(Debug, Clone)]
pub struct ResourceLoader {
    root: PathBuf,
    root_url: Url,
}

impl ResourceLoader {
    /// Create a loader rooted at `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            Error::Config(format!(
                "failed to canonicalize output root '{}': {}",
                root.display(),
                e
            ))
        })?;

        if !canonical.is_dir() {
            return Err(Error::Config(format!(
                "output root must be a directory: {}",
                canonical.display()
            )));
        }

        let root_url = Url::from_directory_path(&canonical).map_err(|_| {
            Error::Config(format!("output root is not a valid file URL: {}", canonical.display()))
        })?;

        Ok(Self {
            root: canonical,
            root_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_url(&self) -> &Url {
        &self.root_url
    }

    /// Map a relative URL to a path under the root.
    ///
    /// A single leading `/` is root-relative. Query strings and fragments are
    /// ignored, percent-escapes are decoded.
    pub fn resolve(&self, url: &str) -> Result<PathBuf> {
        if is_absolute_url(url) {
            return Err(Error::UnsupportedUrl(url.to_string()));
        }
        let relative = url.strip_prefix('/').unwrap_or(url);
        let joined = self
            .root_url
            .join(relative)
            .map_err(|_| Error::UnsupportedUrl(url.to_string()))?;
        self.contained_path(&joined, url)
    }

    fn contained_path(&self, resolved: &Url, original: &str) -> Result<PathBuf> {
        let path = resolved
            .to_file_path()
            .map_err(|_| Error::UnsupportedUrl(original.to_string()))?;
        // URL joining already collapsed literal `..` segments. Any left after
        // decoding came from an escape such as `..%2F`.
        let escapes = path.components().any(|c| c == Component::ParentDir);
        if escapes || !path.starts_with(&self.root) {
            return Err(Error::OutsideRoot(original.to_string()));
        }
        Ok(path)
    }

    /// Read the resource behind a relative URL.
    pub async fn load(&self, url: &str) -> Result<Resource> {
        let path = self.resolve(url)?;
        tracing::info!(path = %path.display(), "fetch");

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Resource { bytes }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound {
                url: url.to_string(),
                path,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Module loader for sandbox `import()`s, bound to the same URL policy as
/// [`ResourceLoader`].
///
/// - No network access (any scheme other than `file:` rejected)
/// - No escape above the output root
/// - Only .js and .mjs files
pub struct SandboxModuleLoader {
    resources: ResourceLoader,
    base: Url,
}

impl SandboxModuleLoader {
    /// `base` is the sandbox location; bare relative specifiers from classic
    /// scripts resolve against it.
    pub fn new(resources: ResourceLoader, base: Url) -> Self {
        Self { resources, base }
    }

    fn is_extension_allowed(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js") | Some("mjs")
        )
    }

    fn resolve_specifier(&self, specifier: &str, referrer: &str) -> Result<ModuleSpecifier> {
        let resolved = if specifier.starts_with("file:") {
            ModuleSpecifier::parse(specifier)
                .map_err(|_| Error::UnsupportedUrl(specifier.to_string()))?
        } else if is_absolute_url(specifier) {
            return Err(Error::UnsupportedUrl(specifier.to_string()));
        } else if let Some(rooted) = specifier.strip_prefix('/') {
            self.resources
                .root_url()
                .join(rooted)
                .map_err(|_| Error::UnsupportedUrl(specifier.to_string()))?
        } else {
            // Referrers that are not file URLs (e.g. "<nb_sandbox>") fall back to the location.
            let base = ModuleSpecifier::parse(referrer)
                .ok()
                .filter(|r| r.scheme() == "file")
                .unwrap_or_else(|| self.base.clone());
            base.join(specifier)
                .map_err(|_| Error::UnsupportedUrl(specifier.to_string()))?
        };

        let path = self.resources.contained_path(&resolved, specifier)?;
        if !Self::is_extension_allowed(&path) {
            return Err(Error::Script(format!(
                "only .js and .mjs modules can be imported, got: {}",
                path.display()
            )));
        }
        Ok(resolved)
    }
}

impl ModuleLoader for SandboxModuleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> std::result::Result<ModuleSpecifier, anyhow::Error> {
        Ok(self.resolve_specifier(specifier, referrer)?)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let specifier = module_specifier.clone();

        let path = match self
            .resources
            .contained_path(&specifier, specifier.as_str())
        {
            Ok(p) => p,
            Err(e) => return ModuleLoadResponse::Sync(Err(e.into())),
        };

        tracing::debug!(path = %path.display(), "sandbox import");
        let code = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return ModuleLoadResponse::Sync(Err(Error::NotFound {
                    url: specifier.to_string(),
                    path,
                }
                .into()));
            }
            Err(e) => return ModuleLoadResponse::Sync(Err(Error::Io(e).into())),
        };

        ModuleLoadResponse::Sync(Ok(ModuleSource::new(
            ModuleType::JavaScript,
            ModuleSourceCode::String(code.into()),
            &specifier,
            None,
        )))
    }
}
