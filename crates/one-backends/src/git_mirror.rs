//! Branch and commit metadata from local bare mirrors.
//!
//! Each repository is expected at `{mirror_dir}/{repo}.git`; keeping the
//! mirrors fresh (`git remote update`) is left to the host.

use std::path::{Path, PathBuf};

use one_core::{CommitInfo, RemoteBranch};
use one_lifecycle::{Backend, BoxFuture, GitHost, UpstreamError, UpstreamResult};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

const BRANCH_FORMAT: &str = "%(refname:short) %(objectname)";
const COMMIT_FORMAT: &str = "%an%x00%ct%x00%B";

fn upstream(message: impl Into<String>) -> UpstreamError {
    UpstreamError::new(Backend::Git, message)
}

/// Git host reading from bare mirrors with the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitMirrorHost {
    mirror_dir: PathBuf,
}

impl GitMirrorHost {
    pub fn new(mirror_dir: impl Into<PathBuf>) -> Self {
        Self {
            mirror_dir: mirror_dir.into(),
        }
    }

    fn repo_path(&self, repo: &str) -> UpstreamResult<PathBuf> {
        if repo.is_empty() || repo.contains('/') || repo.contains("..") {
            return Err(upstream(format!("invalid repository name {repo:?}")));
        }
        Ok(self.mirror_dir.join(format!("{repo}.git")))
    }

    async fn git(&self, repo_path: &Path, args: &[&str]) -> UpstreamResult<String> {
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(repo_path)
            .args(args)
            .output()
            .await
            .map_err(|e| upstream(format!("cannot run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(repo = %repo_path.display(), status = %output.status, "git command failed");
            return Err(upstream(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout).map_err(|e| upstream(format!("git output is not utf-8: {e}")))
    }
}

/// Compile a branch filter anchored at the start of the name.
pub fn compile_filter(filter: &str) -> UpstreamResult<Regex> {
    Regex::new(&format!("^(?:{filter})"))
        .map_err(|e| upstream(format!("invalid branch filter {filter:?}: {e}")))
}

/// Parse `for-each-ref` output: one `name sha` pair per line.
pub fn parse_branches(output: &str, filter: Option<&Regex>) -> Vec<RemoteBranch> {
    output
        .lines()
        .filter_map(|line| {
            let (name, sha) = line.trim().rsplit_once(' ')?;
            Some(RemoteBranch {
                name: name.to_string(),
                sha: sha.to_string(),
            })
        })
        .filter(|branch| filter.is_none_or(|re| re.is_match(&branch.name)))
        .collect()
}

/// Parse `show -s` output in the NUL-separated commit format.
pub fn parse_commit(output: &str) -> UpstreamResult<CommitInfo> {
    let mut fields = output.splitn(3, '\0');
    let (Some(author), Some(timestamp), Some(message)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(upstream("unexpected git show output"));
    };
    let created_at = timestamp
        .trim()
        .parse()
        .map_err(|e| upstream(format!("invalid commit timestamp {timestamp:?}: {e}")))?;
    Ok(CommitInfo {
        message: message.trim_end().to_string(),
        author: author.to_string(),
        created_at,
    })
}

impl GitHost for GitMirrorHost {
    fn list_branches<'a>(
        &'a self,
        repo: &'a str,
        filter: Option<&'a str>,
    ) -> BoxFuture<'a, UpstreamResult<Vec<RemoteBranch>>> {
        Box::pin(async move {
            let regex = filter.map(compile_filter).transpose()?;
            let path = self.repo_path(repo)?;
            let output = self
                .git(&path, &["for-each-ref", "--format", BRANCH_FORMAT, "refs/heads"])
                .await?;
            let branches = parse_branches(&output, regex.as_ref());
            debug!(%repo, branches = branches.len(), "listed branches");
            Ok(branches)
        })
    }

    fn get_commit<'a>(
        &'a self,
        repo: &'a str,
        sha: &'a str,
    ) -> BoxFuture<'a, UpstreamResult<CommitInfo>> {
        Box::pin(async move {
            let path = self.repo_path(repo)?;
            let format = format!("--format={COMMIT_FORMAT}");
            let output = self.git(&path, &["show", "-s", &format, sha]).await?;
            parse_commit(&output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branches_parse_and_filter() {
        let output = "develop 1111\nfeature/login 2222\nmaster 3333\n\n";
        let all = parse_branches(output, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].name, "feature/login");
        assert_eq!(all[1].sha, "2222");

        let re = compile_filter("feat").unwrap();
        let filtered = parse_branches(output, Some(&re));
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn filter_is_anchored_at_start() {
        let re = compile_filter("login").unwrap();
        assert!(parse_branches("feature/login 1\n", Some(&re)).is_empty());
        let re = compile_filter("master|develop").unwrap();
        assert_eq!(parse_branches("master 1\ndevelop 2\nhotfix 3\n", Some(&re)).len(), 2);
    }

    #[test]
    fn invalid_filter_is_upstream_error() {
        let err = compile_filter("(").unwrap_err();
        assert_eq!(err.backend, Backend::Git);
    }

    #[test]
    fn commit_parses() {
        let info = parse_commit("Ada\01700000000\0Fix login\n\nLonger body\n").unwrap();
        assert_eq!(info.author, "Ada");
        assert_eq!(info.created_at, 1_700_000_000);
        assert_eq!(info.message, "Fix login\n\nLonger body");
    }

    #[test]
    fn malformed_commit_is_rejected() {
        assert!(parse_commit("just text").is_err());
        assert!(parse_commit("Ada\0yesterday\0msg").is_err());
    }

    #[test]
    fn repository_names_cannot_escape_mirror_dir() {
        let host = GitMirrorHost::new("/var/lib/one/mirrors");
        assert!(host.repo_path("../etc").is_err());
        assert!(host.repo_path("a/b").is_err());
        assert_eq!(
            host.repo_path("portal").unwrap(),
            PathBuf::from("/var/lib/one/mirrors/portal.git")
        );
    }

    #[tokio::test]
    async fn missing_mirror_is_upstream_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = GitMirrorHost::new(dir.path());
        let err = host.list_branches("portal", None).await.unwrap_err();
        assert_eq!(err.backend, Backend::Git);
    }
}
