use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use backbeat_shared::PROJECT_FORMAT_VERSION;
use backbeat_shared::error::ProjectError;
use backbeat_shared::project::Project;
use backbeat_shared::steps::StepPattern;
use log::info;
use serde::{Deserialize, Serialize};

/// On-disk envelope. `step_patterns` is defaulted so files written before
/// the live step surface existed still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: String,
    pub project: Project,
    #[serde(default)]
    pub step_patterns: Vec<StepPattern>,
}

fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

pub fn serialize_project(
    project: &Project,
    step_patterns: &[StepPattern],
) -> Result<String, anyhow::Error> {
    let file = ProjectFile {
        version: PROJECT_FORMAT_VERSION.to_string(),
        project: project.clone(),
        step_patterns: step_patterns.to_vec(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Parses and validates a project document. Nothing live is touched here:
/// callers swap the returned bundle in only after this succeeds, so a
/// malformed file can never leave a half-loaded session behind.
pub fn deserialize_project(json: &str) -> Result<(Project, Vec<StepPattern>), anyhow::Error> {
    let file: ProjectFile =
        serde_json::from_str(json).map_err(|e| ProjectError::Malformed(e.to_string()))?;
    if major_version(&file.version) != major_version(PROJECT_FORMAT_VERSION) {
        return Err(ProjectError::VersionMismatch {
            found: file.version,
            expected: PROJECT_FORMAT_VERSION.to_string(),
        }
        .into());
    }
    Ok((file.project, file.step_patterns))
}

pub fn save_project_file(
    project: &Project,
    step_patterns: &[StepPattern],
    path: &Path,
) -> Result<(), anyhow::Error> {
    let json = serialize_project(project, step_patterns)?;
    let mut file = File::create(path)
        .with_context(|| format!("failed to create project file {}", path.display()))?;
    file.write_all(json.as_bytes())?;
    info!("[ProjectIO] Saved project '{}' to {}", project.name, path.display());
    Ok(())
}

pub fn load_project_file(path: &Path) -> Result<(Project, Vec<StepPattern>), anyhow::Error> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read project file {}", path.display()))?;
    let loaded = deserialize_project(&content)?;
    info!("[ProjectIO] Loaded project '{}' from {}", loaded.0.name, path.display());
    Ok(loaded)
}
