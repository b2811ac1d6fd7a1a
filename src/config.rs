//! Build configuration.
//!
//! Loaded from a JSON file; every field has a default matching the website
//! layout (`build/website` output root, `nb_sandbox.js` runtime bundle).

use crate::error::{Error, Result};
use crate::loader::is_absolute_url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// An external program invocation.
///
/// Arguments may contain `{placeholders}` filled in by the step that runs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// `link` is created as a symlink pointing at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub target: PathBuf,
    pub link: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleSpec {
    pub input: PathBuf,
    /// Relative to the output root.
    pub output: String,
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    pub command: CommandSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocsSpec {
    /// Relative to the output root.
    pub output: String,
    pub command: CommandSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Base for every other relative path in this config.
    pub project_root: PathBuf,
    /// Website output root. Pages, bundles and fetchable resources live here.
    pub out_dir: PathBuf,
    /// JSON page manifest.
    pub pages: PathBuf,
    /// Notebook runtime bundle evaluated in each sandbox, relative to `out_dir`.
    pub sandbox_script: String,
    /// Path under `out_dir` used as the sandbox's base URL.
    pub sandbox_location: String,
    pub directories: Vec<PathBuf>,
    pub links: Vec<LinkSpec>,
    pub docs: Option<DocsSpec>,
    pub style: Option<StyleSpec>,
    pub bundles: Vec<PathBuf>,
    pub bundler: CommandSpec,
    /// `None` waits for sandboxed work indefinitely.
    pub drain_timeout_ms: Option<u64>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            out_dir: PathBuf::from("build/website"),
            pages: PathBuf::from("website/pages.json"),
            sandbox_script: String::from("nb_sandbox.js"),
            sandbox_location: String::from("sandbox"),
            directories: [
                "build",
                "build/website",
                "build/website/docs",
                "build/website/notebook",
                "build/website/src",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            links: vec![
                LinkSpec {
                    target: "website/".into(),
                    link: "build/website/static".into(),
                },
                LinkSpec {
                    target: "deps/data/".into(),
                    link: "build/website/data".into(),
                },
                LinkSpec {
                    target: "src/testdata/".into(),
                    link: "build/website/src/testdata".into(),
                },
            ],
            docs: None,
            style: Some(StyleSpec {
                input: "website/main.scss".into(),
                output: String::from("bundle.css"),
                include_paths: vec!["website".into()],
                command: CommandSpec::new(
                    "sass",
                    &["--no-source-map", "--load-path={include}", "{input}", "{output}"],
                ),
            }),
            bundles: vec![
                "website/website_main.ts".into(),
                "website/nb_sandbox.ts".into(),
            ],
            bundler: CommandSpec::new(
                "parcel",
                &["build", "{entry}", "--dist-dir", "{out_dir}", "--no-source-maps"],
            ),
            drain_timeout_ms: None,
        }
    }
}

impl BuildConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config '{}': {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`BuildConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(config = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("sandbox_script", self.sandbox_script.as_str()),
            ("sandbox_location", self.sandbox_location.as_str()),
        ] {
            if value.is_empty() || is_absolute_url(value) || Path::new(value).is_absolute() {
                return Err(Error::Config(format!(
                    "{field} must be a relative path under out_dir, got '{value}'"
                )));
            }
        }
        if let Some(style) = &self.style {
            if Path::new(&style.output).is_absolute() {
                return Err(Error::Config("style.output must be relative to out_dir".into()));
            }
        }
        Ok(())
    }

    /// Resolve a config-relative path against `project_root`.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.project_root.join(path)
    }

    pub fn out_dir(&self) -> PathBuf {
        self.resolve(&self.out_dir)
    }

    pub fn pages_path(&self) -> PathBuf {
        self.resolve(&self.pages)
    }

    pub fn sandbox_script_path(&self) -> PathBuf {
        self.out_dir().join(&self.sandbox_script)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}
