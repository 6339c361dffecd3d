use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{info, warn};

use agentnet_crypto::keypair::StoredKey;
use agentnet_crypto::KeyPair;

/// Read the agent key at `path`.
pub fn load(path: &Path) -> anyhow::Result<KeyPair> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading key file {}", path.display()))?;
    let stored: StoredKey = serde_json::from_str(&json).context("parsing key file")?;
    KeyPair::from_stored(&stored).map_err(|e| anyhow::anyhow!("invalid key file {}: {e}", path.display()))
}

/// Write a fresh key to `path`. Refuses to overwrite unless `force` is set.
pub fn generate(path: &Path, force: bool) -> anyhow::Result<KeyPair> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let keypair = KeyPair::generate();
    let json = serde_json::to_string_pretty(&keypair.to_stored()).context("serializing key")?;
    std::fs::write(path, json).with_context(|| format!("writing key file {}", path.display()))?;
    restrict_permissions(path);
    Ok(keypair)
}

/// Load the key at `path`, creating one on first run.
pub fn load_or_generate(path: &Path) -> anyhow::Result<KeyPair> {
    if path.exists() {
        return load(path);
    }
    warn!(path = %path.display(), "no key file found; generating a new agent identity");
    let keypair = generate(path, false)?;
    info!(path = %path.display(), "key file written");
    Ok(keypair)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(path = %path.display(), error = %e, "could not restrict key file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
