// ABOUTME: Client configuration builder for device connections.
// ABOUTME: Assembles authentication methods, host verification, and timeouts.

use crate::error::{Error, Result};
use russh::cipher;
use russh::keys::{load_secret_key, parse_public_key_base64, ssh_key};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for one command batch: the remote shell must exit
/// within this window unless `command_timeout` overrides it.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// An authentication method offered to the remote host.
///
/// Methods are attempted in the order they were added to the builder.
/// One `private_keys` call contributes a single method holding all of
/// its parsed keys, matching the public-key auth grouping of OpenSSH.
#[derive(Clone)]
pub(crate) enum AuthMethod {
    Password(String),
    Keys(Vec<Arc<ssh_key::PrivateKey>>),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::Keys(keys) => write!(f, "Keys({})", keys.len()),
        }
    }
}

/// Policy for validating the remote host's identity.
#[derive(Debug, Clone, Default)]
pub(crate) enum HostVerification {
    /// Accept any server key. Insecure, kept for self-signed and
    /// unmanaged devices.
    #[default]
    AcceptAny,
    /// Accept only keys matching an entry in the given known_hosts file.
    KnownHosts(PathBuf),
}

/// A validated client configuration, ready to dial.
///
/// Built once via [`ConfigBuilder`], read-only afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) user: String,
    pub(crate) auth: Vec<AuthMethod>,
    pub(crate) host_verification: HostVerification,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) command_timeout: Duration,
    pub(crate) extra_ciphers: Vec<cipher::Name>,
    pub(crate) request_pty: bool,
    pub(crate) check_exit_status: bool,
}

impl Config {
    /// Number of authentication methods that will be offered.
    pub fn auth_method_count(&self) -> usize {
        self.auth.len()
    }
}

type PromptFn = Box<dyn FnOnce() -> std::io::Result<String> + Send>;

/// Builder for [`Config`].
///
/// Fallible setters return `Result<Self>` so callers chain with `?`;
/// construction aborts at the first option whose resource cannot be
/// prepared. By default any server key is accepted -- production callers
/// should always apply [`known_hosts`](Self::known_hosts).
///
/// ```no_run
/// use devconf::config::ConfigBuilder;
/// use std::time::Duration;
///
/// # fn main() -> devconf::error::Result<()> {
/// let config = ConfigBuilder::new("admin")
///     .private_key("/home/admin/.ssh/id_ed25519")?
///     .known_hosts("/home/admin/.ssh/known_hosts")?
///     .connect_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ConfigBuilder {
    user: String,
    auth: Vec<AuthMethod>,
    prompt_password: bool,
    prompt: PromptFn,
    host_verification: HostVerification,
    connect_timeout: Option<Duration>,
    command_timeout: Duration,
    extra_ciphers: Vec<cipher::Name>,
    request_pty: bool,
    check_exit_status: bool,
}

impl std::fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBuilder").finish_non_exhaustive()
    }
}

impl ConfigBuilder {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            auth: Vec::new(),
            prompt_password: false,
            prompt: Box::new(|| rpassword::prompt_password("Password: ")),
            host_verification: HostVerification::AcceptAny,
            connect_timeout: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            extra_ciphers: Vec::new(),
            request_pty: false,
            check_exit_status: false,
        }
    }

    /// Add password authentication.
    ///
    /// An empty password defers to an interactive non-echoing prompt,
    /// resolved when [`build`](Self::build) runs. Do not rely on the
    /// prompt in non-interactive contexts; pass the password explicitly
    /// or inject a prompt with [`password_prompt`](Self::password_prompt).
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        if password.is_empty() {
            self.prompt_password = true;
            // Reserve the slot so method order matches option order.
            self.auth.push(AuthMethod::Password(String::new()));
        } else {
            self.auth.push(AuthMethod::Password(password));
        }
        self
    }

    /// Replace the interactive password prompt.
    ///
    /// Used by non-interactive frontends and tests to supply canned
    /// input instead of reading from the terminal.
    pub fn password_prompt<F>(mut self, prompt: F) -> Self
    where
        F: FnOnce() -> std::io::Result<String> + Send + 'static,
    {
        self.prompt = Box::new(prompt);
        self
    }

    /// Add public-key authentication from one key file.
    pub fn private_key(self, path: impl AsRef<Path>) -> Result<Self> {
        self.private_keys([path])
    }

    /// Add public-key authentication from one or more key files.
    ///
    /// All paths together contribute a single authentication method.
    /// The first unreadable or malformed file aborts construction.
    pub fn private_keys<I, P>(mut self, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut keys = Vec::new();
        for path in paths {
            keys.push(load_key(path.as_ref(), None)?);
        }
        self.auth.push(AuthMethod::Keys(keys));
        Ok(self)
    }

    /// Add public-key authentication from an encrypted key file.
    pub fn private_key_with_passphrase(
        mut self,
        path: impl AsRef<Path>,
        passphrase: &str,
    ) -> Result<Self> {
        let key = load_key(path.as_ref(), Some(passphrase))?;
        self.auth.push(AuthMethod::Keys(vec![key]));
        Ok(self)
    }

    /// Allow connecting only to hosts listed in the given known_hosts file.
    ///
    /// Switches host verification from the accept-any default to
    /// must-match. The file is validated eagerly: it must be readable and
    /// every entry must carry a parseable public key.
    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        validate_known_hosts(&path)?;
        self.host_verification = HostVerification::KnownHosts(path);
        Ok(self)
    }

    /// Bound the time allowed for transport establishment.
    ///
    /// Unset means the connect call blocks until the library itself
    /// gives up.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Override the per-batch completion deadline.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Append ciphers to the default negotiated set.
    ///
    /// Needed for legacy devices that only speak older algorithms.
    /// Repeated calls append rather than replace.
    pub fn ciphers<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = cipher::Name>,
    {
        self.extra_ciphers.extend(names);
        self
    }

    /// Allocate a vt100 pseudo-terminal with echo disabled before
    /// starting the shell. Some device consoles refuse a shell without
    /// one.
    pub fn request_pty(mut self, request: bool) -> Self {
        self.request_pty = request;
        self
    }

    /// Treat a non-zero remote exit status as an error.
    ///
    /// Off by default: the shell's own exit status is ignored and only
    /// its output is returned.
    pub fn check_exit_status(mut self, check: bool) -> Self {
        self.check_exit_status = check;
        self
    }

    /// Finalize the configuration.
    ///
    /// Resolves a pending password prompt, then fails with
    /// [`Error::NoAuthMethods`] if no authentication method was added.
    pub fn build(mut self) -> Result<Config> {
        if self.prompt_password {
            let password = (self.prompt)().map_err(Error::Prompt)?;
            for method in &mut self.auth {
                if let AuthMethod::Password(stored) = method
                    && stored.is_empty()
                {
                    *stored = password;
                    break;
                }
            }
        }
        if self.auth.is_empty() {
            return Err(Error::NoAuthMethods);
        }
        Ok(Config {
            user: self.user,
            auth: self.auth,
            host_verification: self.host_verification,
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
            extra_ciphers: self.extra_ciphers,
            request_pty: self.request_pty,
            check_exit_status: self.check_exit_status,
        })
    }
}

fn load_key(path: &Path, passphrase: Option<&str>) -> Result<Arc<ssh_key::PrivateKey>> {
    let key = load_secret_key(path, passphrase).map_err(|e| Error::KeyLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Arc::new(key))
}

/// Check that every entry in a known_hosts file carries a parseable key.
///
/// Full host matching stays with russh at dial time; this only rejects
/// files the check would never be able to use.
fn validate_known_hosts(path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::KnownHosts {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Markers like @cert-authority prefix the host field.
        let line = line.strip_prefix('@').map_or(line, |rest| {
            rest.split_once(char::is_whitespace).map_or("", |(_, r)| r)
        });
        let mut fields = line.split_whitespace();
        let malformed = |reason: String| Error::KnownHosts {
            path: path.to_path_buf(),
            reason,
        };
        let (Some(_hosts), Some(_algo), Some(key)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(format!("line {}: too few fields", lineno + 1)));
        };
        parse_public_key_base64(key)
            .map_err(|e| malformed(format!("line {}: bad public key: {e}", lineno + 1)))?;
    }
    Ok(())
}
