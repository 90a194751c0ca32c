#![warn(missing_docs)]
//! # oab-kiosk-elevation
//!
//! ## Purpose
//! Guards kiosk exit behind an administrative password and OS-level consent.
//!
//! ## Responsibilities
//! - Hold the administrative secret as a SHA-256 digest ([`AdminSecret`]).
//! - Short-circuit on a wrong password before any OS prompt is raised.
//! - Ask the platform for elevation consent ([`ElevationProvider`]).
//!
//! ## Data flow
//! Exit request -> password digest check -> consent provider -> approve/deny.
//!
//! ## Ownership and lifetimes
//! The gate owns the secret digest and shares the provider through `Arc` so
//! the controller and the console shell can hold the same gate.
//!
//! ## Error model
//! [`ElevationError`] distinguishes a password mismatch from a consent denial
//! and from a malformed configured digest.
//!
//! ## Security and privacy notes
//! - Plaintext passwords are hashed immediately and never stored or logged.
//! - Digest comparison runs in constant time.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

/// Default consent command on non-Windows platforms.
pub const DEFAULT_CONSENT_COMMAND: &str = "pkexec true";

const DIGEST_LEN: usize = 32;

/// Configured administrative secret.
#[derive(Clone, PartialEq, Eq)]
pub enum AdminSecret {
    /// SHA-256 digest of the administrative password.
    Digest([u8; DIGEST_LEN]),
    /// No password configured; every exit request is denied.
    Unset,
}

impl AdminSecret {
    /// Hashes a plaintext password.
    pub fn from_plaintext(password: &str) -> Self {
        Self::Digest(digest(password))
    }

    /// Parses a hex-encoded SHA-256 digest.
    ///
    /// # Errors
    /// Returns [`ElevationError::InvalidDigest`] for non-hex input or a wrong
    /// length.
    pub fn from_sha256_hex(encoded: &str) -> Result<Self, ElevationError> {
        let bytes = hex::decode(encoded.trim())
            .map_err(|error| ElevationError::InvalidDigest(error.to_string()))?;
        let digest: [u8; DIGEST_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            ElevationError::InvalidDigest(format!(
                "expected {DIGEST_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::Digest(digest))
    }

    /// Returns `true` when `candidate` hashes to the configured digest.
    pub fn verify(&self, candidate: &str) -> bool {
        match self {
            Self::Digest(expected) => constant_time_eq(expected, &digest(candidate)),
            Self::Unset => false,
        }
    }

    /// Returns `true` when a password is configured.
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Digest(_))
    }
}

impl std::fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Digest(_) => f.write_str("AdminSecret::Digest(<redacted>)"),
            Self::Unset => f.write_str("AdminSecret::Unset"),
        }
    }
}

fn digest(value: &str) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(value.as_bytes()));
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Platform elevation-consent collaborator.
#[async_trait]
pub trait ElevationProvider: Send + Sync {
    /// Prompts for consent; `true` only when the user granted it.
    async fn request_consent(&self) -> bool;
}

/// Password plus OS-consent exit gate.
#[derive(Clone)]
pub struct ElevationGate {
    secret: AdminSecret,
    provider: Arc<dyn ElevationProvider>,
}

impl ElevationGate {
    /// Creates a gate.
    pub fn new(secret: AdminSecret, provider: Arc<dyn ElevationProvider>) -> Self {
        Self { secret, provider }
    }

    /// Authorizes an exit.
    ///
    /// # Errors
    /// Returns [`ElevationError::PasswordMismatch`] without consulting the
    /// provider when the password is wrong or none is configured.
    /// Returns [`ElevationError::ConsentDenied`] when the OS prompt is refused.
    pub async fn authorize_exit(&self, password: &str) -> Result<(), ElevationError> {
        if !self.secret.verify(password) {
            warn!(
                stage = "elevation",
                action = "password_rejected",
                secret_configured = self.secret.is_set()
            );
            return Err(ElevationError::PasswordMismatch);
        }

        if !self.provider.request_consent().await {
            warn!(stage = "elevation", action = "consent_denied");
            return Err(ElevationError::ConsentDenied);
        }

        info!(stage = "elevation", action = "exit_approved");
        Ok(())
    }

    /// Boolean form of [`Self::authorize_exit`].
    pub async fn request_exit(&self, password: &str) -> bool {
        self.authorize_exit(password).await.is_ok()
    }
}

/// Consent provider that runs an external command; consent is a zero exit
/// status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConsentProvider {
    program: String,
    args: Vec<String>,
}

impl CommandConsentProvider {
    /// Creates a provider for `program args...`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parses a whitespace-separated command line.
    ///
    /// # Errors
    /// Returns [`ElevationError::InvalidCommand`] for an empty line.
    pub fn from_command_line(command_line: &str) -> Result<Self, ElevationError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ElevationError::InvalidCommand(command_line.to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Default for CommandConsentProvider {
    fn default() -> Self {
        Self::new("pkexec", vec!["true".to_string()])
    }
}

#[async_trait]
impl ElevationProvider for CommandConsentProvider {
    async fn request_consent(&self) -> bool {
        match tokio::process::Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(error) => {
                warn!(
                    stage = "elevation",
                    action = "consent_command_failed",
                    program = %self.program,
                    error = %error
                );
                false
            }
        }
    }
}

#[cfg(windows)]
pub use uac::UacConsentProvider;

#[cfg(windows)]
mod uac {
    //! UAC consent prompt through `ShellExecuteExW` with the `runas` verb.

    use async_trait::async_trait;
    use tracing::warn;
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::UI::Shell::{
        SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW, ShellExecuteExW,
    };
    use windows_sys::Win32::UI::WindowsAndMessaging::SW_HIDE;

    use super::ElevationProvider;

    /// Raises a UAC prompt for a hidden no-op PowerShell process; consent
    /// means the elevated process was launched.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UacConsentProvider;

    #[async_trait]
    impl ElevationProvider for UacConsentProvider {
        async fn request_consent(&self) -> bool {
            match tokio::task::spawn_blocking(prompt_runas).await {
                Ok(granted) => granted,
                Err(error) => {
                    warn!(stage = "elevation", action = "uac_task_failed", error = %error);
                    false
                }
            }
        }
    }

    fn prompt_runas() -> bool {
        let verb = to_wide("runas");
        let file = to_wide("powershell.exe");
        let parameters = to_wide("-NoProfile -WindowStyle Hidden -Command exit 0");

        let mut info = SHELLEXECUTEINFOW {
            cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
            fMask: SEE_MASK_NOCLOSEPROCESS,
            lpVerb: verb.as_ptr(),
            lpFile: file.as_ptr(),
            lpParameters: parameters.as_ptr(),
            nShow: SW_HIDE,
            ..unsafe { std::mem::zeroed() }
        };

        // A refused or cancelled prompt makes ShellExecuteExW return 0.
        let launched = unsafe { ShellExecuteExW(&mut info) } != 0;
        if launched && !info.hProcess.is_null() {
            unsafe {
                CloseHandle(info.hProcess);
            }
        }
        launched
    }

    fn to_wide(value: &str) -> Vec<u16> {
        value.encode_utf16().chain(std::iter::once(0)).collect()
    }
}

/// Returns the consent provider for the current platform.
///
/// On Windows this is the UAC prompt; elsewhere `command_line` (or
/// [`DEFAULT_CONSENT_COMMAND`]) is run.
///
/// # Errors
/// Returns [`ElevationError::InvalidCommand`] for an empty command line.
pub fn platform_provider(
    command_line: Option<&str>,
) -> Result<Arc<dyn ElevationProvider>, ElevationError> {
    #[cfg(windows)]
    {
        let _ = command_line;
        Ok(Arc::new(UacConsentProvider))
    }

    #[cfg(not(windows))]
    {
        let provider = CommandConsentProvider::from_command_line(
            command_line.unwrap_or(DEFAULT_CONSENT_COMMAND),
        )?;
        Ok(Arc::new(provider))
    }
}

/// Elevation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElevationError {
    /// Password did not match the configured secret.
    #[error("invalid administrator password")]
    PasswordMismatch,
    /// OS consent prompt was refused or failed.
    #[error("elevation consent denied")]
    ConsentDenied,
    /// Configured digest is malformed.
    #[error("invalid admin password digest: {0}")]
    InvalidDigest(String),
    /// Consent command line is empty.
    #[error("invalid consent command: '{0}'")]
    InvalidCommand(String),
}
