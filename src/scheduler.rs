//! Runs every project's commands for one action, one after another or one
//! thread per project.

use anyhow::{Context as _, Result};
use std::fs;
use std::io;
use std::thread;

use crate::config::{Action, Config, ExecutionMode, Project};
use crate::context::Context;
use crate::error::MdcError;
use crate::executor;

/// Runs `action` for a loaded config group. The action name and the group's
/// execution mode are checked before anything runs.
pub fn run_config(ctx: &Context, config: &Config, action: &str, group: &str) -> Result<()> {
    let action: Action = action.parse()?;
    let mode = config.mode()?;
    run(ctx, &config.projects, action, mode, group)
}

pub fn run(
    ctx: &Context,
    projects: &[Project],
    action: Action,
    mode: ExecutionMode,
    group: &str,
) -> Result<()> {
    ensure_commands(projects, action)?;
    validate_paths(projects)?;

    tracing::debug!(group, %action, ?mode, projects = projects.len(), "running group");
    match mode {
        ExecutionMode::Sequential => run_sequential(ctx, projects, action, group),
        ExecutionMode::Parallel => run_parallel(ctx, projects, action, group),
    }
}

pub fn ensure_commands(projects: &[Project], action: Action) -> Result<()> {
    for project in projects {
        if project.commands_for(action).is_empty() {
            return Err(MdcError::NoCommands {
                project: project.name.clone(),
                action: action.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Every project directory must exist and be a directory before any command
/// runs.
pub fn validate_paths(projects: &[Project]) -> Result<()> {
    for project in projects {
        let metadata = match fs::metadata(&project.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(MdcError::PathMissing {
                    project: project.name.clone(),
                    path: project.path.clone(),
                }
                .into());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "project `{}`: failed to inspect {}",
                        project.name,
                        project.path.display()
                    )
                });
            }
        };

        if !metadata.is_dir() {
            return Err(MdcError::NotADirectory {
                project: project.name.clone(),
                path: project.path.clone(),
            }
            .into());
        }
    }
    Ok(())
}

fn run_sequential(ctx: &Context, projects: &[Project], action: Action, group: &str) -> Result<()> {
    for project in projects {
        run_project(ctx, project, action, group, false)?;
    }
    Ok(())
}

fn run_parallel(ctx: &Context, projects: &[Project], action: Action, group: &str) -> Result<()> {
    let mut results: Vec<Option<Result<()>>> = projects.iter().map(|_| None).collect();

    thread::scope(|scope| {
        for (slot, project) in results.iter_mut().zip(projects) {
            scope.spawn(move || {
                *slot = Some(run_project(ctx, project, action, group, true));
            });
        }
    });

    let failures: Vec<String> = results
        .into_iter()
        .flatten()
        .filter_map(Result::err)
        .map(|err| format!("{err:#}"))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(MdcError::ProjectsFailed(failures).into())
    }
}

// Fail-fast within one project.
fn run_project(
    ctx: &Context,
    project: &Project,
    action: Action,
    group: &str,
    buffered: bool,
) -> Result<()> {
    for spec in project.commands_for(action) {
        executor::execute(ctx, project, spec, group, buffered)?;
    }
    ctx.reporter.project_done(&project.name);
    Ok(())
}
