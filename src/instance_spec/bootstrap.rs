//! First-boot script for instances reached through the proxy broker.
//!
//! The guest agent does not materialise login users for tunnelled SSH, so the
//! script creates the user and copies its key out of the instance metadata.

/// Metadata key holding the boot-time script.
pub const STARTUP_SCRIPT_KEY: &str = "startup-script";

/// Metadata key holding `user:key` SSH entries.
pub const SSH_KEYS_KEY: &str = "ssh-keys";

const METADATA_SSH_KEYS_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/attributes/ssh-keys";

/// Renders the bootstrap script for `user`.
///
/// The caller must pass a validated POSIX login name; the name is spliced
/// into paths and patterns unquoted.
#[must_use]
pub fn render(user: &str) -> String {
    let home = format!("/home/{user}");
    let ssh_dir = format!("{home}/.ssh");
    let keys = format!("{ssh_dir}/authorized_keys");
    let sudoers = format!("/etc/sudoers.d/{user}");
    let lines = [
        String::from("#!/bin/bash"),
        String::from("set -u"),
        format!("if ! id -u {user} > /dev/null 2>&1; then"),
        format!("  useradd -m -s /bin/bash {user}"),
        format!("  usermod -aG sudo {user}"),
        format!("  echo \"{user} ALL=(ALL) NOPASSWD:ALL\" > {sudoers}"),
        format!("  chmod 0440 {sudoers}"),
        String::from("fi"),
        format!("mkdir -p {ssh_dir}"),
        format!("chmod 700 {ssh_dir}"),
        format!("curl -s \"{METADATA_SSH_KEYS_URL}\" \\"),
        String::from("  -H \"Metadata-Flavor: Google\" | \\"),
        format!("  grep \"^{user}:\" | \\"),
        format!("  sed 's/^{user}://' > {keys}"),
        format!("chmod 600 {keys}"),
        format!("chown -R {user}:{user} {ssh_dir}"),
    ];
    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Returns whether `user` is a conservative POSIX login name.
#[must_use]
pub fn is_valid_login_name(user: &str) -> bool {
    let mut chars = user.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first == '_')
        && user.len() <= 32
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-')
}
