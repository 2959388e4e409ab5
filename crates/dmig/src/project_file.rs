use dmig_core::{Project, valid_machine_name};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Project files live at `<directory>/<machineName>-dmk.yml`.
pub const PROJECT_FILE_SUFFIX: &str = "-dmk.yml";

#[derive(Debug, Error)]
pub enum ProjectFileError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid project: {0}")]
    Invalid(String),
}

pub fn project_path(directory: &Path, machine_name: &str) -> PathBuf {
    directory.join(format!("{}{}", machine_name, PROJECT_FILE_SUFFIX))
}

/// Load and validate a project file.
pub fn load_project(directory: &Path, machine_name: &str) -> Result<Project, ProjectFileError> {
    let path = project_path(directory, machine_name);
    let text = std::fs::read_to_string(&path).map_err(|source| ProjectFileError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let project: Project =
        serde_yaml::from_str(&text).map_err(|source| ProjectFileError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    validate(&project)?;
    Ok(project)
}

/// Machine names must obey the `[a-z0-9_-]` contract and every map key
/// must equal its component's machine name.
fn validate(project: &Project) -> Result<(), ProjectFileError> {
    let mut check = |kind: &str, key: &str, machine_name: &str| {
        if !valid_machine_name(key) {
            return Err(ProjectFileError::Invalid(format!(
                "{kind} key {key:?} is not a valid machine name"
            )));
        }
        if key != machine_name {
            return Err(ProjectFileError::Invalid(format!(
                "{kind} key {key:?} does not match machine name {machine_name:?}"
            )));
        }
        Ok(())
    };

    for (key, database) in &project.databases {
        check("database", key, &database.component.machine_name)?;
    }
    for (key, tunnel) in &project.tunnels {
        check("tunnel", key, &tunnel.component.machine_name)?;
    }
    for (key, migration) in &project.migrations {
        check("migration", key, &migration.component.machine_name)?;
    }
    Ok(())
}
