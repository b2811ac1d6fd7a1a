//! Build steps that run before any page is rendered.
//!
//! Style compilation and bundling are delegated to external tools; the
//! traits are the seam the pipeline drives them through.

use crate::config::{CommandSpec, LinkSpec};
use crate::error::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Create output directories and asset symlinks under `root`.
///
/// Existing links are left alone.
pub fn scaffold(root: &Path, directories: &[PathBuf], links: &[LinkSpec]) -> Result<()> {
    for dir in directories {
        let dir = root.join(dir);
        tracing::debug!(dir = %dir.display(), "mkdir");
        std::fs::create_dir_all(&dir)?;
    }

    for link in links {
        let target = absolute(&root.join(&link.target))?;
        let path = root.join(&link.link);
        if path.symlink_metadata().is_ok() {
            tracing::debug!(link = %path.display(), "link exists");
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!(link = %path.display(), target = %target.display(), "symlink");
        symlink_dir(&target, &path)?;
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

/// Compiles a stylesheet to a fixed output path.
pub trait StyleCompiler {
    fn compile(&self, input: &Path, include_paths: &[PathBuf], output: &Path) -> Result<()>;
}

/// Bundles a client script entry point into the output tree.
pub trait Bundler {
    fn bundle(&self, entry: &Path, out_dir: &Path) -> Result<()>;
}

/// Runs a style compiler CLI.
///
/// Placeholders: `{input}`, `{output}`, and `{include}` (an argument holding
/// it is repeated once per include path).
pub struct CommandStyleCompiler {
    command: CommandSpec,
    cwd: PathBuf,
}

impl CommandStyleCompiler {
    pub fn new(command: CommandSpec, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command,
            cwd: cwd.into(),
        }
    }
}

impl StyleCompiler for CommandStyleCompiler {
    fn compile(&self, input: &Path, include_paths: &[PathBuf], output: &Path) -> Result<()> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        let includes: Vec<String> = include_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let args = expand_args(
            &self.command.args,
            &[("input", &input), ("output", &output)],
            &includes,
        );
        tracing::info!(input = %input, output = %output, "scss");
        run_command("style compiler", &self.command.program, &args, &self.cwd)
    }
}

/// Runs a bundler CLI. Placeholders: `{entry}`, `{out_dir}`.
pub struct CommandBundler {
    command: CommandSpec,
    cwd: PathBuf,
}

impl CommandBundler {
    pub fn new(command: CommandSpec, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command,
            cwd: cwd.into(),
        }
    }
}

impl Bundler for CommandBundler {
    fn bundle(&self, entry: &Path, out_dir: &Path) -> Result<()> {
        let entry = entry.display().to_string();
        let out_dir = out_dir.display().to_string();
        let args = expand_args(
            &self.command.args,
            &[("entry", &entry), ("out_dir", &out_dir)],
            &[],
        );
        tracing::info!(entry = %entry, out_dir = %out_dir, "bundle");
        run_command("bundler", &self.command.program, &args, &self.cwd)
    }
}

/// Run the documentation JSON generator. Placeholder: `{output}`.
pub fn generate_docs(command: &CommandSpec, output: &Path, cwd: &Path) -> Result<()> {
    let output = output.display().to_string();
    let args = expand_args(&command.args, &[("output", &output)], &[]);
    tracing::info!(output = %output, "docs");
    run_command("docs generator", &command.program, &args, cwd)
}

fn expand_args(args: &[String], vars: &[(&str, &str)], include: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let mut arg = arg.clone();
        for (name, value) in vars {
            arg = arg.replace(&format!("{{{name}}}"), value);
        }
        if arg.contains("{include}") {
            out.extend(include.iter().map(|dir| arg.replace("{include}", dir)));
        } else {
            out.push(arg);
        }
    }
    out
}

fn run_command(step: &str, program: &str, args: &[String], cwd: &Path) -> Result<()> {
    tracing::debug!(step, program, ?args, cwd = %cwd.display(), "running");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| Error::Step {
            step: step.to_string(),
            message: format!("failed to spawn '{program}': {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Step {
            step: step.to_string(),
            message: format!("'{program}' exited with {}: {}", output.status, stderr.trim()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_expand_args() {
        let args: Vec<String> = ["--load-path={include}", "{input}", "{output}", "-q"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let expanded = expand_args(
            &args,
            &[("input", "main.scss"), ("output", "out/bundle.css")],
            &["website".into(), "vendor".into()],
        );
        assert_eq!(
            expanded,
            [
                "--load-path=website",
                "--load-path=vendor",
                "main.scss",
                "out/bundle.css",
                "-q"
            ]
        );
    }

    #[test]
    fn test_expand_args_drops_include_without_paths() {
        let args = vec!["--load-path={include}".to_string(), "{entry}".to_string()];
        assert_eq!(expand_args(&args, &[("entry", "a.ts")], &[]), ["a.ts"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_scaffold_creates_dirs_and_links() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("website")).unwrap();
        fs::write(dir.path().join("website/logo.svg"), "<svg/>").unwrap();

        let links = vec![LinkSpec {
            target: "website/".into(),
            link: "build/website/static".into(),
        }];
        let dirs = vec![PathBuf::from("build/website/docs")];

        scaffold(dir.path(), &dirs, &links).unwrap();
        assert!(dir.path().join("build/website/docs").is_dir());
        assert_eq!(
            fs::read_to_string(dir.path().join("build/website/static/logo.svg")).unwrap(),
            "<svg/>"
        );

        // Second run is a no-op.
        scaffold(dir.path(), &dirs, &links).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_is_step_error() {
        let dir = tempdir().unwrap();
        let bundler = CommandBundler::new(CommandSpec::new("false", &[]), dir.path());
        let err = bundler.bundle(Path::new("a.ts"), dir.path()).unwrap_err();
        assert!(matches!(err, Error::Step { ref step, .. } if step == "bundler"));
    }

    #[test]
    fn test_missing_program_is_step_error() {
        let dir = tempdir().unwrap();
        let compiler = CommandStyleCompiler::new(
            CommandSpec::new("definitely-not-a-real-sass-binary", &[]),
            dir.path(),
        );
        let err = compiler
            .compile(Path::new("main.scss"), &[], Path::new("bundle.css"))
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
