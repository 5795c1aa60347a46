//! Git deployment glue
//!
//! The serve side discovers the repository, derives the topic name, writes a
//! nonce file under the git dir, and installs this executable as the
//! `post-receive` hook. The hook side (run by git after a push) reads the
//! nonce file and relays stdin to the hub's loopback listener.
//!
//! The nonce is a shared secret between the two sides of one process
//! deployment; it only proves a POST came from someone who can read the git
//! dir, which is exactly the set of people allowed to publish.

use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

/// Name of the nonce file inside the git dir
pub const NONCE_FILE: &str = "git-pubsubhubbub.txt";

/// Errors from hook installation and relay
#[derive(Debug, Error)]
pub enum HookError {
    #[error("git failed: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nonce file is malformed: {0}")]
    NonceFile(String),

    #[error("a foreign post-receive hook already exists, refusing to replace it")]
    HookExists,

    #[error("relaying to the hub failed: {0}")]
    Relay(String),
}

async fn git_output(args: &[&str]) -> Result<String, HookError> {
    let output = Command::new("git").args(args).output().await?;
    if !output.status.success() {
        return Err(HookError::Git(format!(
            "git {}: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

/// Path of the current repository's git dir
pub async fn git_dir() -> Result<PathBuf, HookError> {
    Ok(PathBuf::from(git_output(&["rev-parse", "--git-dir"]).await?))
}

/// Repository name the topic is derived from
///
/// Basename of the worktree toplevel, or of the git dir itself for bare
/// repositories (where `--show-toplevel` has nothing to report).
pub async fn repo_name(git_dir: &Path) -> Result<String, HookError> {
    let toplevel = match git_output(&["rev-parse", "--show-toplevel"]).await {
        Ok(s) if !s.is_empty() => PathBuf::from(s),
        _ => std::path::absolute(git_dir)?,
    };
    toplevel
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| HookError::Git("cannot derive repository name".to_string()))
}

/// Topic URL for a repository's push events
pub fn topic_for(topic_prefix: &str, repo_name: &str) -> String {
    format!("{}{}/events/push", topic_prefix, repo_name)
}

/// Generate the hook nonce: 32 random bytes, hex-encoded
pub fn generate_nonce() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    hex::encode(bytes)
}

/// Split a nonce file's contents into (endpoint, nonce)
pub fn parse_nonce_file(contents: &str) -> Result<(String, String), HookError> {
    contents
        .trim_end()
        .split_once(' ')
        .map(|(endpoint, nonce)| (endpoint.to_string(), nonce.to_string()))
        .ok_or_else(|| HookError::NonceFile("expected '<endpoint> <nonce>'".to_string()))
}

/// Write the nonce file under the git dir
///
/// Whoever can write the repository may call the hook, nobody else: the git
/// dir's write bits are mirrored into the file's read bits and the owner is
/// copied over, so readability of the nonce tracks pushability of the repo.
pub fn write_nonce_file(
    git_dir: &Path,
    endpoint: &str,
    nonce: &str,
) -> Result<PathBuf, HookError> {
    let path = git_dir.join(NONCE_FILE);
    std::fs::remove_file(&path).ok();

    let contents = format!("{} {}", endpoint, nonce);

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};

        let git_stat = std::fs::metadata(git_dir)?;
        let mode = 0o200 | ((git_stat.mode() & 0o222) << 1);

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o200)
            .open(&path)?;

        let file_stat = file.metadata()?;
        if file_stat.uid() != git_stat.uid() || file_stat.gid() != git_stat.gid() {
            if let Err(e) = std::os::unix::fs::chown(
                &path,
                Some(git_stat.uid()),
                Some(git_stat.gid()),
            ) {
                std::fs::remove_file(&path).ok();
                return Err(HookError::Io(e));
            }
        }
        file.set_permissions(std::fs::Permissions::from_mode(mode))?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    std::fs::write(&path, contents)?;

    Ok(path)
}

/// Install this executable as the repository's post-receive hook
///
/// Creates a symlink to the current executable. Refuses if a post-receive
/// hook already exists and is not ours.
pub fn install_post_receive_hook(git_dir: &Path) -> Result<PathBuf, HookError> {
    let selfpath = std::env::current_exe()?;
    let hook = git_dir.join("hooks").join("post-receive");
    std::fs::create_dir_all(hook.parent().expect("hook path has a parent"))?;

    match std::fs::read_link(&hook) {
        Ok(target) if target == selfpath => return Ok(hook),
        Ok(_) => return Err(HookError::HookExists),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        // Exists but is not a symlink
        Err(_) => return Err(HookError::HookExists),
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(&selfpath, &hook)?;
    #[cfg(not(unix))]
    return Err(HookError::Git("hook install requires unix".to_string()));

    info!(hook = %hook.display(), "Installed post-receive hook");
    Ok(hook)
}

/// Remove the nonce file and the hook symlink if it still points at us
pub fn remove_artifacts(git_dir: &Path) {
    let nonce_path = git_dir.join(NONCE_FILE);
    if let Err(e) = std::fs::remove_file(&nonce_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "Failed to remove nonce file");
        }
    }

    let hook = git_dir.join("hooks").join("post-receive");
    if let (Ok(target), Ok(selfpath)) = (std::fs::read_link(&hook), std::env::current_exe()) {
        if target == selfpath {
            if let Err(e) = std::fs::remove_file(&hook) {
                warn!(error = %e, "Failed to remove post-receive hook");
            }
        }
    }
}

/// Hook-side relay: POST stdin to the hub's loopback endpoint
///
/// Called by git after a push completes. The response body is copied to
/// stdout so the pusher sees whatever the hub had to say.
pub async fn relay_hook() -> Result<(), HookError> {
    let git_dir = git_dir().await?;
    let contents = std::fs::read_to_string(git_dir.join(NONCE_FILE)).map_err(|e| {
        HookError::NonceFile(format!(
            "cannot read {}: {}; notification may not have been sent",
            NONCE_FILE, e
        ))
    })?;
    let (endpoint, nonce) = parse_nonce_file(&contents)?;

    let mut payload = Vec::new();
    tokio::io::stdin().read_to_end(&mut payload).await?;

    let client = reqwest::Client::new();
    let response = client
        .post(&endpoint)
        .header("X-Git-Pubsubhubbub-Nonce", nonce)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(payload)
        .send()
        .await
        .map_err(|e| HookError::Relay(e.to_string()))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| HookError::Relay(e.to_string()))?;

    use std::io::Write;
    std::io::stdout().write_all(&body).ok();

    if !status.is_success() {
        return Err(HookError::Relay(format!("hub answered {}", status)));
    }
    Ok(())
}
