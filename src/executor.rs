//! Runs one command for one project.

use anyhow::{Context as _, Result};
use std::path::Path;

use crate::capture::{self, Foreground};
use crate::config::{CommandSpec, Project};
use crate::context::Context;
use crate::error::MdcError;
use crate::registry::ProcessEntry;

/// Runs `spec` in the project's directory. Background commands are started
/// detached and recorded in the registry; foreground commands run to
/// completion. The reporter sees `start` first and exactly one closing
/// notification.
pub fn execute(
    ctx: &Context,
    project: &Project,
    spec: &CommandSpec,
    group: &str,
    buffered: bool,
) -> Result<()> {
    ctx.reporter.start(&project.name, &spec.command);

    if spec.background {
        execute_background(ctx, project, spec, group)
    } else {
        execute_foreground(ctx, project, spec, buffered)
    }
}

fn execute_foreground(
    ctx: &Context,
    project: &Project,
    spec: &CommandSpec,
    buffered: bool,
) -> Result<()> {
    let strategy = Foreground::select(&ctx.capabilities, buffered);
    let framed = !strategy.is_buffered();

    if framed {
        ctx.reporter.border();
    }
    let result = capture::run_foreground(strategy, &spec.command, &project.path);
    if framed {
        ctx.reporter.border();
    }

    let (reason, output) = match result {
        Ok(done) if done.success() => {
            ctx.reporter.success(&project.name, &spec.command);
            return Ok(());
        }
        Ok(done) => (done.describe(), done.output),
        Err(err) => (err.to_string(), String::new()),
    };

    ctx.reporter.failure(&project.name, &spec.command, &reason);
    if strategy.is_buffered() {
        ctx.reporter.output(&project.name, &output);
    }

    Err(MdcError::CommandFailed {
        project: project.name.clone(),
        command: spec.command.clone(),
        reason,
    }
    .into())
}

fn execute_background(
    ctx: &Context,
    project: &Project,
    spec: &CommandSpec,
    group: &str,
) -> Result<()> {
    let pid = match spawn_logged(ctx, group, &project.name, &spec.command, &project.path) {
        Ok(pid) => pid,
        Err(err) => {
            ctx.reporter
                .failure(&project.name, &spec.command, &format!("{err:#}"));
            return Err(err);
        }
    };

    let entry = ProcessEntry {
        pid,
        command: spec.command.clone(),
        dir: project.path.to_string_lossy().to_string(),
    };
    if let Err(err) = ctx
        .registry
        .append(group, &project.name, entry)
        .with_context(|| format!("project `{}`: failed to save pid {pid}", project.name))
    {
        ctx.reporter
            .failure(&project.name, &spec.command, &format!("{err:#}"));
        return Err(err);
    }

    ctx.reporter.background(&project.name, &spec.command, pid);
    Ok(())
}

/// Starts a detached process whose output lands in the project's pending
/// log, then renames that log after the new pid. A failed rename is only a
/// warning.
pub fn spawn_logged(
    ctx: &Context,
    group: &str,
    project: &str,
    command: &str,
    dir: &Path,
) -> Result<u32> {
    let pending = ctx.layout.pending_log(group, project);

    let pid = capture::spawn_background(&ctx.capabilities, command, dir, Some(&pending))
        .map_err(|err| MdcError::BackgroundSpawn {
            project: project.to_string(),
            command: command.to_string(),
            reason: err.to_string(),
        })?;

    if let Err(err) = capture::promote_pending_log(&pending, pid) {
        ctx.reporter
            .warn(project, &format!("log rename failed: {err}"));
    }

    Ok(pid)
}
