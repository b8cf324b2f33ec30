use anyhow::{Context as _, Result, bail};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use crate::cli::{Cli, Command};
use crate::config::{self, Action, Config};
use crate::context::Context;
use crate::executor;
use crate::logs::{self, AttachOutcome};
use crate::paths;
use crate::process;
use crate::registry::{GroupEntries, ProcessEntry};
use crate::scheduler;

pub fn run(cli: Cli) -> Result<()> {
    let ctx = Context::from_env()?;

    match cli.command {
        Command::Up { group, dry_run } => up(&ctx, &group, dry_run),
        Command::Down { group, dry_run } => down(&ctx, &group, dry_run),
        Command::List => list_groups(&ctx),
        Command::Procs { group } => list_processes(&ctx, group.as_deref()),
        Command::Attach {
            pid,
            tail,
            no_follow,
        } => attach(&ctx, pid, tail, !no_follow),
        Command::Stop { pid } => stop(&ctx, pid),
        Command::Restart { pid } => restart(&ctx, pid),
    }
}

fn load_group(ctx: &Context, group: &str) -> Result<Config> {
    Config::load_from_dir(ctx.layout.base(), group)
}

fn up(ctx: &Context, group: &str, dry_run: bool) -> Result<()> {
    let config = load_group(ctx, group)?;
    if dry_run {
        return print_plan(&config, group, Action::Up);
    }

    scheduler::run_config(ctx, &config, Action::Up.as_str(), group)
}

fn down(ctx: &Context, group: &str, dry_run: bool) -> Result<()> {
    let config = load_group(ctx, group)?;
    if dry_run {
        return print_plan(&config, group, Action::Down);
    }

    scheduler::run_config(ctx, &config, Action::Down.as_str(), group)?;
    stop_group(ctx, group);
    Ok(())
}

// Cleanup problems never fail `down`.
fn stop_group(ctx: &Context, group: &str) {
    let result = ctx.registry.kill_all_with_callback(
        group,
        ctx.controller.as_ref(),
        ctx.graceful_timeout,
        |project, entry| ctx.reporter.stopping(project, &entry.command, entry.pid),
    );

    if let Err(err) = result {
        ctx.reporter.warn(
            group,
            &format!("failed to clean up background processes: {err:#}"),
        );
    }
}

fn print_plan(config: &Config, group: &str, action: Action) -> Result<()> {
    config.mode()?;
    scheduler::ensure_commands(&config.projects, action)?;

    println!(
        "Dry run: `{action}` for `{group}` ({})",
        config.execution_mode
    );
    for line in render_plan(config, action) {
        println!("{line}");
    }
    Ok(())
}

fn render_plan(config: &Config, action: Action) -> Vec<String> {
    let mut lines = Vec::new();
    for project in &config.projects {
        lines.push(format!(
            "  [{}] {}",
            project.name,
            paths::shorten_home(&project.path.to_string_lossy())
        ));
        for spec in project.commands_for(action) {
            if spec.background {
                lines.push(format!("    - {} (background)", spec.command));
            } else {
                lines.push(format!("    - {}", spec.command));
            }
        }
    }
    lines
}

fn list_groups(ctx: &Context) -> Result<()> {
    let base = ctx.layout.base();
    let names = config::list_configs(base)?;

    if names.is_empty() {
        println!("No config files found in {}", paths::shorten_home(&base.to_string_lossy()));
        return Ok(());
    }

    println!("Config YAML Files:");
    for name in names {
        println!("  - {name}");
    }
    Ok(())
}

fn list_processes(ctx: &Context, group: Option<&str>) -> Result<()> {
    let all = match group {
        Some(group) => {
            let projects = ctx.registry.load_all(group)?;
            let mut all = BTreeMap::new();
            if !projects.is_empty() {
                all.insert(group.to_string(), projects);
            }
            all
        }
        None => ctx.registry.load_all_groups()?,
    };

    let lines = render_processes(&all, |pid| ctx.controller.is_running(pid));
    if lines.is_empty() {
        println!("No background processes found.");
        return Ok(());
    }

    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn render_processes(
    all: &BTreeMap<String, GroupEntries>,
    is_running: impl Fn(u32) -> bool,
) -> Vec<String> {
    let mut lines = Vec::new();
    for (group, projects) in all {
        for (project, entries) in projects {
            for entry in entries {
                let status = if is_running(entry.pid) { "running" } else { "dead" };
                lines.push(format!(
                    "{group}/{project}  {}  {status}  {}  {}",
                    entry.pid,
                    entry.command,
                    paths::shorten_home(&entry.dir)
                ));
            }
        }
    }
    lines
}

fn attach(ctx: &Context, pid: u32, tail: usize, follow: bool) -> Result<()> {
    let tracked = ctx.registry.find_by_pid(pid)?;
    let (group, project) = (tracked.group.as_str(), tracked.project.as_str());

    let mut log = ctx.layout.pid_log(group, project, pid);
    if !log.exists() {
        let pending = ctx.layout.pending_log(group, project);
        if !pending.exists() {
            bail!(
                "log file not found: {}\nThis process may have been started before log capture was enabled.",
                log.display()
            );
        }
        log = pending;
    }

    ctx.reporter.attached(project, &tracked.entry.command, pid);

    let detach = if follow {
        logs::spawn_interrupt_listener()
    } else {
        None
    };

    let mut out = io::stdout().lock();
    let result = logs::attach(
        &log,
        pid,
        tail,
        follow,
        ctx.controller.as_ref(),
        &mut out,
        detach.as_ref(),
    );
    drop(out);

    match result {
        Ok(AttachOutcome::Drained) => {}
        Ok(AttachOutcome::Exited) => ctx.reporter.process_exited(project, pid),
        Ok(AttachOutcome::Detached) => ctx.reporter.detached(project),
        Err(err) => ctx.reporter.warn(project, &format!("{err:#}")),
    }
    Ok(())
}

fn stop(ctx: &Context, pid: u32) -> Result<()> {
    let tracked = ctx.registry.find_by_pid(pid)?;
    let project = tracked.project.as_str();

    ctx.reporter.stopping(project, &tracked.entry.command, pid);
    let outcome = process::graceful_kill(ctx.controller.as_ref(), pid, ctx.graceful_timeout);
    tracing::debug!(pid, ?outcome, "stop finished");

    if let Err(err) = ctx.registry.remove_entry(&tracked.group, project, pid) {
        ctx.reporter
            .warn(project, &format!("failed to remove PID entry: {err:#}"));
    }

    ctx.reporter.stopped(project);
    Ok(())
}

fn restart(ctx: &Context, pid: u32) -> Result<()> {
    let tracked = ctx.registry.find_by_pid(pid)?;
    let (group, project) = (tracked.group.as_str(), tracked.project.as_str());
    let command = tracked.entry.command.as_str();

    ctx.reporter.stopping(project, command, pid);
    let outcome = process::graceful_kill(ctx.controller.as_ref(), pid, ctx.graceful_timeout);
    tracing::debug!(pid, ?outcome, "old process stopped");

    let dir = Path::new(&tracked.entry.dir);
    let new_pid = match executor::spawn_logged(ctx, group, project, command, dir) {
        Ok(new_pid) => new_pid,
        Err(err) => {
            ctx.reporter.failure(project, command, &format!("{err:#}"));
            if let Err(remove_err) = ctx.registry.remove_entry(group, project, pid) {
                ctx.reporter
                    .warn(project, &format!("failed to remove old PID entry: {remove_err:#}"));
            }
            return Err(err).with_context(|| format!("failed to restart pid {pid}"));
        }
    };

    if let Err(err) = ctx.registry.remove_entry(group, project, pid) {
        ctx.reporter
            .warn(project, &format!("failed to remove old PID entry: {err:#}"));
    }

    let entry = ProcessEntry {
        pid: new_pid,
        command: command.to_string(),
        dir: tracked.entry.dir.clone(),
    };
    if let Err(err) = ctx.registry.append(group, project, entry) {
        ctx.reporter
            .warn(project, &format!("failed to save new PID entry: {err:#}"));
    }

    ctx.reporter.background(project, command, new_pid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, command: &str, dir: &str) -> ProcessEntry {
        ProcessEntry {
            pid,
            command: command.to_string(),
            dir: dir.to_string(),
        }
    }

    #[test]
    fn process_lines_are_grouped_and_carry_status() {
        let mut dev = GroupEntries::new();
        dev.insert(
            "web".to_string(),
            vec![entry(20, "npm run dev", "/srv/web")],
        );
        dev.insert(
            "api".to_string(),
            vec![entry(10, "cargo run", "/srv/api"), entry(11, "worker", "/srv/api")],
        );
        let mut all = BTreeMap::new();
        all.insert("dev".to_string(), dev);

        let lines = render_processes(&all, |pid| pid != 11);

        assert_eq!(
            lines,
            vec![
                "dev/api  10  running  cargo run  /srv/api",
                "dev/api  11  dead  worker  /srv/api",
                "dev/web  20  running  npm run dev  /srv/web",
            ]
        );
    }

    #[test]
    fn plan_lists_commands_per_project() {
        let config = Config::parse(
            "execution_mode: sequential\nprojects:\n  - name: api\n    path: /srv/api\n    commands:\n      up:\n        - make build\n        - {command: make serve, background: true}\n",
        )
        .expect("parse");

        assert_eq!(
            render_plan(&config, Action::Up),
            vec![
                "  [api] /srv/api",
                "    - make build",
                "    - make serve (background)",
            ]
        );
        assert_eq!(render_plan(&config, Action::Down), vec!["  [api] /srv/api"]);
    }
}
