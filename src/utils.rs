use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

// For signature verification
use hmac::{Hmac, Mac};
use sha2::Sha256;
type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Helper function for verifying GitHub webhook signature
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    // Expected format: "sha256=..."
    let Some(git_signature) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let git_signature_bytes = match hex::decode(git_signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            error!("Signature header is not valid hex");
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&git_signature_bytes).is_ok()
}

/// Computes the `X-Hub-Signature-256` header value GitHub would send for `payload`.
#[cfg(test)]
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Runs an external command without a shell and waits at most `timeout` for it.
/// Returns trimmed stdout on success, or a message carrying stderr on failure.
pub async fn run_command<I, S>(
    program: &Path,
    args: &[String],
    envs: I,
    timeout: Duration,
) -> Result<String, String>
where
    I: IntoIterator<Item = (S, S)>,
    S: AsRef<OsStr>,
{
    let cmd_str = format!("{} {}", program.display(), args.join(" "));
    info!("Running: {}", cmd_str);

    let child = Command::new(program)
        .args(args)
        .envs(envs)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            let msg = format!("{} failed to start: {}", cmd_str, e);
            error!("{}", msg);
            return Err(msg);
        }
        Err(_) => {
            let msg = format!("{} timed out after {}s", cmd_str, timeout.as_secs());
            error!("{}", msg);
            return Err(msg);
        }
    };

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("{} output:\n{}", cmd_str, stdout);
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let msg = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        error!("{} failed: {}", cmd_str, msg);
        Err(msg)
    }
}
