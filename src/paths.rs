use anyhow::{Result, anyhow};
use std::env;
use std::path::{Path, PathBuf};

const PENDING_LOG_NAME: &str = "_pending.log";

pub fn resolve_home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        if let Some(userprofile) = env::var_os("USERPROFILE").filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(userprofile));
        }

        if let (Some(mut homedrive), Some(homepath)) =
            (env::var_os("HOMEDRIVE"), env::var_os("HOMEPATH"))
            && !homedrive.is_empty()
            && !homepath.is_empty()
        {
            homedrive.push(homepath);
            return Some(PathBuf::from(homedrive));
        }

        env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    #[cfg(not(windows))]
    {
        env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

/// Root of everything mdc keeps on disk: config groups, registry, logs.
pub fn mdc_home() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("MDC_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let home = resolve_home_dir()
        .ok_or_else(|| anyhow!("failed to resolve home directory from environment variables"))?;
    Ok(home.join(".config").join("mdc"))
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    // `~user` forms are left alone.
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with(['/', '\\']) => rest.trim_start_matches(['/', '\\']),
        _ => return Ok(PathBuf::from(path)),
    };

    let home = resolve_home_dir()
        .ok_or_else(|| anyhow!("failed to resolve home directory for `{path}`"))?;
    if rest.is_empty() {
        Ok(home)
    } else {
        Ok(home.join(rest))
    }
}

/// Replaces the home prefix of `path` with `~` for display.
pub fn shorten_home(path: &str) -> String {
    let Some(home) = resolve_home_dir() else {
        return path.to_string();
    };
    let home = home.to_string_lossy();

    if path == home {
        return "~".to_string();
    }
    match path.strip_prefix(home.as_ref()) {
        Some(rest) if rest.starts_with('/') => format!("~{rest}"),
        _ => path.to_string(),
    }
}

/// On-disk layout below the base directory.
///
/// ```text
/// <base>/pids/<group>/<project>.json
/// <base>/proc/<group>/<project>/<pid>.log
/// <base>/proc/<group>/<project>/_pending.log
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn pids_root(&self) -> PathBuf {
        self.base.join("pids")
    }

    pub fn pids_dir(&self, group: &str) -> PathBuf {
        self.pids_root().join(group)
    }

    pub fn registry_file(&self, group: &str, project: &str) -> PathBuf {
        self.pids_dir(group).join(format!("{project}.json"))
    }

    pub fn logs_dir(&self, group: &str) -> PathBuf {
        self.base.join("proc").join(group)
    }

    pub fn project_logs_dir(&self, group: &str, project: &str) -> PathBuf {
        self.logs_dir(group).join(project)
    }

    pub fn pending_log(&self, group: &str, project: &str) -> PathBuf {
        self.project_logs_dir(group, project).join(PENDING_LOG_NAME)
    }

    pub fn pid_log(&self, group: &str, project: &str, pid: u32) -> PathBuf {
        self.project_logs_dir(group, project)
            .join(format!("{pid}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_places_registry_and_logs_under_base() {
        let layout = Layout::new("/tmp/mdc-base");

        assert_eq!(
            layout.registry_file("dev", "api"),
            PathBuf::from("/tmp/mdc-base/pids/dev/api.json")
        );
        assert_eq!(
            layout.pid_log("dev", "api", 4242),
            PathBuf::from("/tmp/mdc-base/proc/dev/api/4242.log")
        );
        assert_eq!(
            layout.pending_log("dev", "api"),
            PathBuf::from("/tmp/mdc-base/proc/dev/api/_pending.log")
        );
    }

    #[test]
    fn expand_home_leaves_plain_paths_alone() {
        assert_eq!(
            expand_home("/srv/app").expect("expand"),
            PathBuf::from("/srv/app")
        );
    }

    #[test]
    fn expand_home_only_touches_own_home_prefix() {
        assert_eq!(
            expand_home("~alice/src").expect("expand"),
            PathBuf::from("~alice/src")
        );
        assert_eq!(expand_home("~~").expect("expand"), PathBuf::from("~~"));

        let Some(home) = resolve_home_dir() else {
            return;
        };
        assert_eq!(expand_home("~").expect("expand"), home);
        assert_eq!(expand_home("~/src/api").expect("expand"), home.join("src/api"));
    }
}
