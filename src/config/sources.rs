use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{ConfigError, FeedMode, SourceSpec, expand_tilde};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCandidate {
    pub path: PathBuf,
    pub mode: FeedMode,
}

/// Expands configured sources into concrete feed files. Configured order is
/// kept since inserts and deletes do not commute; files matched by one glob
/// or directory are sorted by path.
pub fn resolve_feed_files(
    cwd: &Path,
    home: Option<&Path>,
    sources: &[SourceSpec],
    exclude_patterns: &[String],
) -> Result<Vec<FeedCandidate>, ConfigError> {
    let excludes = compile_excludes(cwd, home, exclude_patterns)?;
    let mut out: Vec<FeedCandidate> = Vec::new();
    let mut seen: HashSet<(PathBuf, FeedMode)> = HashSet::new();

    for source in sources {
        let raw_path = source.path.trim();
        if raw_path.is_empty() {
            continue;
        }
        let expanded = absolutize(cwd, expand_tilde(raw_path, home));
        let mut files = if looks_like_glob(raw_path) {
            glob_paths(&expanded)?
        } else if expanded.is_dir() {
            WalkDir::new(&expanded)
                .into_iter()
                .filter_map(Result::ok)
                .map(|entry| entry.path().to_path_buf())
                .filter(|path| path.is_file())
                .collect::<Vec<_>>()
        } else if expanded.is_file() {
            vec![expanded]
        } else {
            tracing::warn!(source = raw_path, "feed source matched no files");
            Vec::new()
        };
        files.sort();

        for path in files {
            if excludes.iter().any(|pattern| pattern.matches_path(&path)) {
                tracing::debug!(path = %path.display(), "feed excluded");
                continue;
            }
            if seen.insert((path.clone(), source.mode)) {
                out.push(FeedCandidate {
                    path,
                    mode: source.mode,
                });
            }
        }
    }
    Ok(out)
}

fn absolutize(cwd: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}

fn looks_like_glob(path: &str) -> bool {
    ['*', '?', '[', ']', '{', '}']
        .iter()
        .any(|ch| path.contains(*ch))
}

fn glob_paths(pattern: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let pattern_str = pattern.to_string_lossy();
    let entries = glob::glob(&pattern_str).map_err(|err| ConfigError::InvalidGlob {
        pattern: pattern_str.to_string(),
        reason: err.msg.to_string(),
    })?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| ConfigError::Io(err.into_error()))?;
        if path.is_file() {
            out.push(path);
        }
    }
    Ok(out)
}

fn compile_excludes(
    cwd: &Path,
    home: Option<&Path>,
    patterns: &[String],
) -> Result<Vec<glob::Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .map(|raw| {
            let normalized = absolutize(cwd, expand_tilde(raw, home));
            let normalized = normalized.to_string_lossy();
            glob::Pattern::new(&normalized).map_err(|err| ConfigError::InvalidGlob {
                pattern: raw.to_string(),
                reason: err.msg.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::resolve_feed_files;
    use crate::config::{FeedMode, SourceSpec};
    use std::fs;

    fn source(path: &str, mode: FeedMode) -> SourceSpec {
        SourceSpec {
            path: path.to_string(),
            mode,
        }
    }

    #[test]
    fn keeps_configured_order_and_sorts_within_globs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("feeds")).unwrap();
        fs::write(root.join("feeds/b.jsonl"), "").unwrap();
        fs::write(root.join("feeds/a.jsonl"), "").unwrap();
        fs::write(root.join("feeds/private-c.jsonl"), "").unwrap();
        fs::write(root.join("deleted.jsonl"), "").unwrap();

        let sources = vec![
            source("deleted.jsonl", FeedMode::Delete),
            source("feeds/*.jsonl", FeedMode::Insert),
            source("missing.jsonl", FeedMode::Insert),
        ];
        let resolved = resolve_feed_files(
            root,
            None,
            &sources,
            &["feeds/private-*".to_string()],
        )
        .expect("resolve");

        let names = resolved
            .iter()
            .map(|candidate| {
                (
                    candidate.path.file_name().unwrap().to_string_lossy().to_string(),
                    candidate.mode,
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                ("deleted.jsonl".to_string(), FeedMode::Delete),
                ("a.jsonl".to_string(), FeedMode::Insert),
                ("b.jsonl".to_string(), FeedMode::Insert),
            ]
        );
    }

    #[test]
    fn walks_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("feeds/nested")).unwrap();
        fs::write(root.join("feeds/nested/x.jsonl"), "").unwrap();
        fs::write(root.join("feeds/y.jsonl"), "").unwrap();

        let resolved =
            resolve_feed_files(root, None, &[source("feeds", FeedMode::Insert)], &[]).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].path.ends_with("feeds/nested/x.jsonl"));
        assert!(resolved[1].path.ends_with("feeds/y.jsonl"));
    }

    #[test]
    fn overlapping_sources_resolve_each_file_once_per_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("feeds")).unwrap();
        fs::write(root.join("feeds/a.jsonl"), "").unwrap();
        fs::write(root.join("feeds/b.jsonl"), "").unwrap();

        let sources = vec![
            source("feeds/a.jsonl", FeedMode::Insert),
            source("feeds/*.jsonl", FeedMode::Insert),
            source("feeds", FeedMode::Insert),
            source("feeds/a.jsonl", FeedMode::Delete),
        ];
        let resolved = resolve_feed_files(root, None, &sources, &[]).expect("resolve");

        let names = resolved
            .iter()
            .map(|candidate| {
                (
                    candidate.path.file_name().unwrap().to_string_lossy().to_string(),
                    candidate.mode,
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                ("a.jsonl".to_string(), FeedMode::Insert),
                ("b.jsonl".to_string(), FeedMode::Insert),
                ("a.jsonl".to_string(), FeedMode::Delete),
            ]
        );
    }

    #[test]
    fn invalid_exclude_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = resolve_feed_files(dir.path(), None, &[], &["[".to_string()]);
        assert!(err.is_err());
    }
}
