//! Per-script virtualenv layout and provisioning.
//!
//! Each script owns one directory under `<data_root>/scripts`, keyed by
//! its folder (when any) and slug:
//!
//! ```text
//! scripts/<folder?>/<slug>/
//!   <slug>.py          # source, materialized from the store every run
//!   requirements.txt   # declared dependency manifest
//!   .venv/             # the isolated interpreter tree
//!   .env-state.json    # {python_version, requirements_hash, installed_at}
//! ```
//!
//! Provisioning is idempotent: the venv is created once, and `pip
//! install` only runs when the SHA-256 of the manifest differs from the
//! recorded state. The store is authoritative for source and manifest;
//! both files are rewritten fresh on every run.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::process::Command;

/// Which provisioning phase failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvPhase {
    CreateDirectories,
    CreateVenv,
    UpgradePip,
    WriteManifest,
    InstallRequirements,
    WriteState,
    WriteSource,
    Introspect,
    Cleanup,
}

impl EnvPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDirectories => "create-directories",
            Self::CreateVenv => "create-venv",
            Self::UpgradePip => "upgrade-pip",
            Self::WriteManifest => "write-manifest",
            Self::InstallRequirements => "install-requirements",
            Self::WriteState => "write-state",
            Self::WriteSource => "write-source",
            Self::Introspect => "introspect",
            Self::Cleanup => "cleanup",
        }
    }
}

/// A structured provisioning failure: the phase plus the installer's
/// captured stderr (or the I/O error text).
#[derive(Debug, thiserror::Error)]
#[error("environment {phase} failed: {detail}", phase = .phase.as_str())]
pub struct EnvError {
    pub phase: EnvPhase,
    pub detail: String,
}

impl EnvError {
    fn new(phase: EnvPhase, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: detail.into(),
        }
    }
}

/// Contents of `.env-state.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvState {
    pub python_version: String,
    pub requirements_hash: String,
    pub installed_at: DateTime<Utc>,
}

/// What [`EnvironmentManager::provision`] actually did.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionReport {
    /// A fresh venv was created this call.
    pub created: bool,
    /// `pip install` ran because the manifest hash changed.
    pub installed: bool,
}

/// One installed package, as reported by `pip list --format=json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

/// Read-only environment introspection for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct VenvInfo {
    pub venv_exists: bool,
    pub python_version: Option<String>,
    pub packages: Vec<PackageInfo>,
    pub package_count: usize,
    pub venv_path: String,
    /// Recorded state of the last successful synchronization, when any.
    pub last_install: Option<EnvState>,
}

/// Maps one script to its on-disk environment.
pub struct EnvironmentManager {
    data_root: PathBuf,
    script_dir: PathBuf,
    venv_dir: PathBuf,
    script_file: PathBuf,
    requirements_file: PathBuf,
    state_file: PathBuf,
}

impl EnvironmentManager {
    /// Build the path layout for a script. `folder` is the owning
    /// folder's name, when the script lives in one.
    pub fn new(data_root: impl Into<PathBuf>, folder: Option<&str>, slug: &str) -> Self {
        let data_root = data_root.into();
        let mut script_dir = data_root.join("scripts");
        if let Some(folder) = folder {
            script_dir = script_dir.join(folder);
        }
        let script_dir = script_dir.join(slug);

        Self {
            venv_dir: script_dir.join(".venv"),
            script_file: script_dir.join(format!("{slug}.py")),
            requirements_file: script_dir.join("requirements.txt"),
            state_file: script_dir.join(".env-state.json"),
            script_dir,
            data_root,
        }
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn script_file(&self) -> &Path {
        &self.script_file
    }

    pub fn venv_dir(&self) -> &Path {
        &self.venv_dir
    }

    /// The venv's interpreter binary.
    pub fn python_binary(&self) -> PathBuf {
        self.venv_dir.join("bin").join("python")
    }

    fn pip_binary(&self) -> PathBuf {
        self.venv_dir.join("bin").join("pip")
    }

    /// Stable hex digest of a requirements manifest.
    pub fn hash_requirements(requirements: &str) -> String {
        format!("{:x}", Sha256::digest(requirements.as_bytes()))
    }

    /// Materialize the script source from the store.
    ///
    /// Called at the start of every run so on-disk drift never wins over
    /// the catalog.
    pub async fn write_source(&self, content: &str) -> Result<(), EnvError> {
        fs::create_dir_all(&self.script_dir)
            .await
            .map_err(|e| EnvError::new(EnvPhase::CreateDirectories, e.to_string()))?;
        fs::write(&self.script_file, content)
            .await
            .map_err(|e| EnvError::new(EnvPhase::WriteSource, e.to_string()))
    }

    /// Ensure the venv exists and the installed set matches the manifest.
    pub async fn provision(
        &self,
        python_version: &str,
        requirements: &str,
    ) -> Result<ProvisionReport, EnvError> {
        let mut report = ProvisionReport::default();

        fs::create_dir_all(&self.script_dir)
            .await
            .map_err(|e| EnvError::new(EnvPhase::CreateDirectories, e.to_string()))?;

        if fs::metadata(&self.venv_dir).await.is_err() {
            self.create_venv(python_version).await?;
            report.created = true;
        }

        fs::write(&self.requirements_file, requirements)
            .await
            .map_err(|e| EnvError::new(EnvPhase::WriteManifest, e.to_string()))?;

        let hash = Self::hash_requirements(requirements);
        let state = self.read_state().await;
        let up_to_date = state
            .as_ref()
            .is_some_and(|s| s.requirements_hash == hash);

        if !up_to_date {
            if !requirements.trim().is_empty() {
                self.install_requirements().await?;
                report.installed = true;
            }
            self.write_state(&EnvState {
                python_version: python_version.to_string(),
                requirements_hash: hash,
                installed_at: Utc::now(),
            })
            .await?;
        }

        Ok(report)
    }

    /// Create the venv with the requested interpreter, falling back to
    /// `python3` when the versioned binary is not on PATH, then upgrade
    /// pip inside it.
    async fn create_venv(&self, python_version: &str) -> Result<(), EnvError> {
        let versioned = format!("python{python_version}");
        let output = match run_captured(&versioned, &["-m", "venv"], &self.venv_dir).await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    requested = %versioned,
                    "versioned interpreter not found, falling back to python3"
                );
                run_captured("python3", &["-m", "venv"], &self.venv_dir)
                    .await
                    .map_err(|e| EnvError::new(EnvPhase::CreateVenv, e.to_string()))?
            }
            Err(e) => return Err(EnvError::new(EnvPhase::CreateVenv, e.to_string())),
        };

        if !output.status.success() {
            // A half-created tree would shadow the failure on retry.
            let _ = fs::remove_dir_all(&self.venv_dir).await;
            return Err(EnvError::new(
                EnvPhase::CreateVenv,
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let pip = self.pip_binary();
        match Command::new(&pip)
            .args(["install", "--upgrade", "pip"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) if !output.status.success() => {
                tracing::warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "pip self-upgrade failed, continuing with bundled pip"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "pip self-upgrade could not run");
            }
            _ => {}
        }

        Ok(())
    }

    async fn install_requirements(&self) -> Result<(), EnvError> {
        let pip = self.pip_binary();
        let output = Command::new(&pip)
            .arg("install")
            .arg("-r")
            .arg(&self.requirements_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EnvError::new(EnvPhase::InstallRequirements, e.to_string()))?;

        if !output.status.success() {
            return Err(EnvError::new(
                EnvPhase::InstallRequirements,
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }

    async fn read_state(&self) -> Option<EnvState> {
        let raw = fs::read_to_string(&self.state_file).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    async fn write_state(&self, state: &EnvState) -> Result<(), EnvError> {
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| EnvError::new(EnvPhase::WriteState, e.to_string()))?;
        fs::write(&self.state_file, raw)
            .await
            .map_err(|e| EnvError::new(EnvPhase::WriteState, e.to_string()))
    }

    /// Report the environment's current state for the HTTP surface.
    pub async fn introspect(&self) -> VenvInfo {
        let venv_exists = fs::metadata(&self.venv_dir).await.is_ok();
        if !venv_exists {
            return VenvInfo {
                venv_exists: false,
                python_version: None,
                packages: vec![],
                package_count: 0,
                venv_path: self.venv_dir.display().to_string(),
                last_install: None,
            };
        }

        let python_version = match run_captured_path(&self.python_binary(), &["--version"]).await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            _ => None,
        };

        let packages: Vec<PackageInfo> =
            match run_captured_path(&self.pip_binary(), &["list", "--format=json"]).await {
                Ok(output) if output.status.success() => {
                    serde_json::from_slice(&output.stdout).unwrap_or_default()
                }
                _ => vec![],
            };

        VenvInfo {
            venv_exists: true,
            python_version,
            package_count: packages.len(),
            packages,
            venv_path: self.venv_dir.display().to_string(),
            last_install: self.read_state().await,
        }
    }

    /// Remove the script's whole directory tree.
    ///
    /// Refuses to touch anything outside the manager's data root.
    pub async fn cleanup(&self) -> Result<(), EnvError> {
        if !self.script_dir.starts_with(&self.data_root) {
            return Err(EnvError::new(
                EnvPhase::Cleanup,
                format!(
                    "refusing to remove {} outside data root {}",
                    self.script_dir.display(),
                    self.data_root.display()
                ),
            ));
        }

        match fs::remove_dir_all(&self.script_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EnvError::new(EnvPhase::Cleanup, e.to_string())),
        }
    }
}

/// Run `program args... target` capturing output.
async fn run_captured(
    program: &str,
    args: &[&str],
    target: &Path,
) -> std::io::Result<std::process::Output> {
    Command::new(program)
        .args(args)
        .arg(target)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
}

/// Run a binary by path with arguments, capturing output.
async fn run_captured_path(program: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
    Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
}
