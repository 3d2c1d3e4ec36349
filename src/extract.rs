use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::bundle::{ConfigEntry, DecryptedBundle};
use crate::error::{IoContext, Result};
use crate::platform;

/// Permissions of extracted secret files
pub const SECRET_FILE_MODE: u32 = 0o640;

/// Environment variable pointing a hook at the file that changed
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

/// What one extraction pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Secrets rewritten because their content changed
    pub written: usize,
    /// Secrets already holding the right content
    pub unchanged: usize,
    /// Hooks that failed to start or exited non-zero
    pub hook_failures: usize,
}

/// Write every entry of `bundle` into `secrets_dir`
///
/// Files whose content already matches are left alone. For changed entries
/// with an `on_changed` command the command is run after the write; hook
/// failures are logged and counted but never abort the pass. Filesystem
/// errors do.
pub fn extract(bundle: &DecryptedBundle, secrets_dir: &Path) -> Result<ExtractSummary> {
    std::fs::metadata(secrets_dir)
        .fs_context(|| format!("Secrets directory unavailable: {}", secrets_dir.display()))?;

    let mut summary = ExtractSummary::default();

    for (name, entry) in bundle {
        tracing::info!("Extracting {}", name);
        let path = secrets_dir.join(name);

        if !update_secret(&path, entry.value.as_bytes())? {
            tracing::debug!("{} unchanged", name);
            summary.unchanged += 1;
            continue;
        }
        summary.written += 1;

        if !entry.on_changed.is_empty() && !run_on_changed(name, entry, &path) {
            summary.hook_failures += 1;
        }
    }

    Ok(summary)
}

/// Atomically replace `path` with `content` unless it already matches
///
/// Returns whether the file was written.
fn update_secret(path: &Path, content: &[u8]) -> Result<bool> {
    match std::fs::read(path) {
        Ok(current) if current == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            // Unreadable current content: overwrite it and let the write report real problems
            tracing::debug!("Unable to read {}: {}", path.display(), e);
        }
    }

    platform::atomic_write(path, content, Some(SECRET_FILE_MODE))?;
    Ok(true)
}

/// Run an entry's on-change command; returns false if it failed
fn run_on_changed(name: &str, entry: &ConfigEntry, path: &Path) -> bool {
    tracing::info!("Running on-change command for {}: {:?}", name, entry.on_changed);

    let config_file = absolute(path);
    let (program, args) = match entry.on_changed.split_first() {
        Some(split) => split,
        None => return true,
    };

    let status = Command::new(program)
        .args(args)
        .env(CONFIG_FILE_ENV, &config_file)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status();

    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::error!("On-change command for {} failed: {}", name, status);
            false
        }
        Err(e) => {
            tracing::error!("Unable to run on-change command for {}: {}", name, e);
            false
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use tempfile::tempdir;

    fn bundle(entries: &[(&str, ConfigEntry)]) -> DecryptedBundle {
        entries
            .iter()
            .map(|(name, entry)| (name.to_string(), entry.clone()))
            .collect()
    }

    #[test]
    fn writes_each_entry_to_its_file() {
        let secrets = tempdir().unwrap();
        let b = bundle(&[
            ("a.conf", ConfigEntry::new("v1")),
            ("b.conf", ConfigEntry::new("other")),
        ]);

        let summary = extract(&b, secrets.path()).unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(std::fs::read_to_string(secrets.path().join("a.conf")).unwrap(), "v1");
        assert_eq!(std::fs::read_to_string(secrets.path().join("b.conf")).unwrap(), "other");
    }

    #[test]
    fn second_run_with_same_bundle_writes_nothing() {
        let secrets = tempdir().unwrap();
        let b = bundle(&[("a.conf", ConfigEntry::new("v1"))]);

        extract(&b, secrets.path()).unwrap();
        let path = secrets.path().join("a.conf");
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        let summary = extract(&b, secrets.path()).unwrap();

        assert_eq!(
            summary,
            ExtractSummary {
                written: 0,
                unchanged: 1,
                hook_failures: 0
            }
        );
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn changed_value_is_rewritten() {
        let secrets = tempdir().unwrap();
        extract(&bundle(&[("a.conf", ConfigEntry::new("v1"))]), secrets.path()).unwrap();

        let summary =
            extract(&bundle(&[("a.conf", ConfigEntry::new("v2"))]), secrets.path()).unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(std::fs::read_to_string(secrets.path().join("a.conf")).unwrap(), "v2");
    }

    #[test]
    fn missing_secrets_dir_fails_fast() {
        let temp_dir = tempdir().unwrap();
        let secrets = temp_dir.path().join("secrets");

        let err = extract(&bundle(&[("a.conf", ConfigEntry::new("v1"))]), &secrets).unwrap_err();

        assert!(matches!(err, SyncError::Filesystem { .. }));
        assert!(!secrets.exists());
    }

    #[cfg(unix)]
    #[test]
    fn secret_files_are_not_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let secrets = tempdir().unwrap();
        extract(&bundle(&[("a.conf", ConfigEntry::new("v1"))]), secrets.path()).unwrap();

        let mode = std::fs::metadata(secrets.path().join("a.conf"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, SECRET_FILE_MODE);
    }

    #[cfg(unix)]
    mod hooks {
        use super::*;

        /// Hook that appends `$CONFIG_FILE` to `log` and exits with `code`
        fn logging_hook(log: &Path, code: i32) -> ConfigEntry {
            ConfigEntry::new("").with_on_changed([
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("echo \"$CONFIG_FILE\" >> '{}'; exit {}", log.display(), code),
            ])
        }

        fn log_lines(log: &Path) -> Vec<String> {
            std::fs::read_to_string(log)
                .unwrap_or_default()
                .lines()
                .map(String::from)
                .collect()
        }

        #[test]
        fn hook_runs_once_per_change_with_config_file() {
            let secrets = tempdir().unwrap();
            let scratch = tempdir().unwrap();
            let log = scratch.path().join("hook.log");
            let entry = |value: &str| ConfigEntry {
                value: value.to_string(),
                ..logging_hook(&log, 0)
            };

            extract(&bundle(&[("a.conf", entry("v1"))]), secrets.path()).unwrap();
            extract(&bundle(&[("a.conf", entry("v1"))]), secrets.path()).unwrap();
            assert_eq!(log_lines(&log).len(), 1);

            let summary = extract(&bundle(&[("a.conf", entry("v2"))]), secrets.path()).unwrap();

            let expected = absolute(&secrets.path().join("a.conf"));
            assert_eq!(summary.hook_failures, 0);
            assert_eq!(
                log_lines(&log),
                vec![expected.display().to_string(), expected.display().to_string()]
            );
        }

        #[test]
        fn failing_hook_does_not_stop_other_entries() {
            let secrets = tempdir().unwrap();
            let scratch = tempdir().unwrap();
            let log = scratch.path().join("hook.log");

            let failing = ConfigEntry {
                value: "a".to_string(),
                ..logging_hook(&log, 3)
            };
            let passing = ConfigEntry {
                value: "b".to_string(),
                ..logging_hook(&log, 0)
            };

            let summary = extract(
                &bundle(&[("a", failing), ("b", passing)]),
                secrets.path(),
            )
            .unwrap();

            assert_eq!(summary.written, 2);
            assert_eq!(summary.hook_failures, 1);
            assert_eq!(std::fs::read_to_string(secrets.path().join("b")).unwrap(), "b");
            assert_eq!(log_lines(&log).len(), 2);
        }

        #[test]
        fn missing_hook_binary_is_not_fatal() {
            let secrets = tempdir().unwrap();
            let entry =
                ConfigEntry::new("v1").with_on_changed(["/nonexistent/definitely-not-a-hook"]);

            let summary = extract(&bundle(&[("a.conf", entry)]), secrets.path()).unwrap();

            assert_eq!(summary.written, 1);
            assert_eq!(summary.hook_failures, 1);
        }

        #[test]
        fn entry_named_like_a_temp_file_is_left_alone() {
            let secrets = tempdir().unwrap();
            let scratch = tempdir().unwrap();
            let a_log = scratch.path().join("a.log");
            let tmp_log = scratch.path().join("tmp.log");

            let pass = |a_value: &str| {
                bundle(&[
                    (
                        "a.conf",
                        ConfigEntry {
                            value: a_value.to_string(),
                            ..logging_hook(&a_log, 0)
                        },
                    ),
                    (
                        "a.conf.tmp",
                        ConfigEntry {
                            value: "x".to_string(),
                            ..logging_hook(&tmp_log, 0)
                        },
                    ),
                ])
            };

            extract(&pass("v1"), secrets.path()).unwrap();
            let summary = extract(&pass("v2"), secrets.path()).unwrap();

            assert_eq!(
                summary,
                ExtractSummary {
                    written: 1,
                    unchanged: 1,
                    hook_failures: 0
                }
            );
            assert_eq!(std::fs::read_to_string(secrets.path().join("a.conf")).unwrap(), "v2");
            assert_eq!(std::fs::read_to_string(secrets.path().join("a.conf.tmp")).unwrap(), "x");
            assert_eq!(log_lines(&a_log).len(), 2);
            assert_eq!(log_lines(&tmp_log).len(), 1);
        }

        #[test]
        fn unchanged_entry_does_not_run_hook() {
            let secrets = tempdir().unwrap();
            let scratch = tempdir().unwrap();
            let log = scratch.path().join("hook.log");
            std::fs::write(secrets.path().join("a.conf"), "v1").unwrap();

            let entry = ConfigEntry {
                value: "v1".to_string(),
                ..logging_hook(&log, 0)
            };
            extract(&bundle(&[("a.conf", entry)]), secrets.path()).unwrap();

            assert!(log_lines(&log).is_empty());
        }
    }
}
