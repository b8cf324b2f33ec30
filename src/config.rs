use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::MdcError;
use crate::paths;

const CONFIG_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl FromStr for ExecutionMode {
    type Err = MdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(MdcError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Up,
    Down,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = MdcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(MdcError::UnknownAction(other.to_string())),
        }
    }
}

/// A command line plus whether it runs detached. YAML accepts either a bare
/// string or `{command, background}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawCommand")]
pub struct CommandSpec {
    pub command: String,
    pub background: bool,
}

impl CommandSpec {
    pub fn foreground(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            background: false,
        }
    }

    pub fn background(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            background: true,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Plain(String),
    Detailed {
        command: String,
        #[serde(default)]
        background: bool,
    },
}

impl From<RawCommand> for CommandSpec {
    fn from(raw: RawCommand) -> Self {
        match raw {
            RawCommand::Plain(command) => Self::foreground(command),
            RawCommand::Detailed {
                command,
                background,
            } => Self {
                command,
                background,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Commands {
    pub up: Vec<CommandSpec>,
    pub down: Vec<CommandSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub commands: Commands,
}

impl Project {
    pub fn commands_for(&self, action: Action) -> &[CommandSpec] {
        match action {
            Action::Up => &self.commands.up,
            Action::Down => &self.commands.down,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution_mode: String,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl Config {
    pub fn load_from_dir(dir: &Path, name: &str) -> Result<Self> {
        let path = resolve_config_path(dir, name)?;
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;

        for project in &mut config.projects {
            let expanded = paths::expand_home(&project.path.to_string_lossy())
                .with_context(|| format!("project `{}`", project.name))?;
            project.path = expanded;
        }

        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw).context("invalid YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn mode(&self) -> Result<ExecutionMode, MdcError> {
        self.execution_mode.parse()
    }

    fn validate(&self) -> Result<()> {
        self.mode()?;

        if self.projects.is_empty() {
            bail!("at least one project must be defined");
        }

        let mut names = HashSet::new();
        for (index, project) in self.projects.iter().enumerate() {
            if project.name.trim().is_empty() {
                bail!("project[{index}]: name is required");
            }
            if project.path.as_os_str().is_empty() {
                bail!("project `{}`: path is required", project.name);
            }
            if !names.insert(project.name.as_str()) {
                bail!("project `{}` is defined more than once", project.name);
            }
        }

        Ok(())
    }
}

fn resolve_config_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    if path.extension().is_some() {
        return Ok(path);
    }

    for ext in CONFIG_EXTENSIONS {
        let candidate = path.with_extension(ext);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    bail!(
        "config file not found: tried {0}.yml and {0}.yaml",
        path.display()
    )
}

/// Config file names in `dir`, sorted. A missing directory lists nothing.
pub fn list_configs(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        let path = entry.path();
        let is_config = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext));
        if path.is_file() && is_config {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }

    names.sort();
    Ok(names)
}
