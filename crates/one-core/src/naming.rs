//! Deterministic environment naming and hostname rewriting.
//!
//! An environment's name is derived from its content: the same set of
//! (repository, sha, branch) triples always yields the same name, so a
//! duplicate creation request is detected instead of silently duplicated.

use sha2::{Digest, Sha512};

use crate::types::CommitSpec;

/// Prefix carried by every managed environment name.
pub const ENV_PREFIX: &str = "ms-";

/// Number of hex characters of the digest kept in the name.
const DIGEST_CHARS: usize = 8;

/// Compute the environment name for a commit spec.
///
/// Entries are sorted descending by repository name and the fields of each
/// triple are concatenated without separator before hashing with SHA-512.
/// A missing sha contributes the empty string.
pub fn namespace_name(spec: &CommitSpec) -> String {
    let mut triples: Vec<(&str, &str, &str)> = spec
        .iter()
        .map(|(repo, commit)| {
            (
                repo.as_str(),
                commit.sha.as_deref().unwrap_or(""),
                commit.branch.as_str(),
            )
        })
        .collect();
    triples.sort_by(|a, b| b.0.cmp(a.0));

    let mut hasher = Sha512::new();
    for (repo, sha, branch) in triples {
        hasher.update(repo.as_bytes());
        hasher.update(sha.as_bytes());
        hasher.update(branch.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{ENV_PREFIX}{}", &digest[..DIGEST_CHARS])
}

/// Whether a namespace name belongs to a managed environment.
pub fn is_managed(name: &str) -> bool {
    name.strip_prefix(ENV_PREFIX)
        .is_some_and(|rest| !rest.is_empty())
}

/// Rewrite a template hostname for an environment.
///
/// `portal.example.com` becomes `{env}-portal.example.com`.
pub fn rewrite_host(env: &str, host: &str) -> String {
    match host.split_once('.') {
        Some((first, domain)) => format!("{env}-{first}.{domain}"),
        None => format!("{env}-{host}"),
    }
}

/// CI job name of a project inside an environment.
pub fn job_name(env: &str, project: &str) -> String {
    format!("{env}-{project}")
}
