use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use packrestore_core::RestoreError;
use serde::Deserialize;
use tracing::{debug, warn};

const PLUGIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub uri: String,
    pub is_retry: bool,
    pub non_interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialResponse {
    Provided(Credentials),
    NotApplicable,
}

/// Something that can supply credentials for a feed url.
///
/// Failures are fatal: a provider that times out or aborts stops the
/// restore rather than letting the request continue unauthenticated.
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &str;

    fn try_get_credentials(
        &self,
        request: &CredentialRequest,
        timeout: Duration,
    ) -> Result<CredentialResponse>;
}

/// Credentials configured up front, matched by url prefix.
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    entries: Vec<(String, Credentials)>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, uri_prefix: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.push((uri_prefix.into(), credentials));
        self
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn name(&self) -> &str {
        "configuration"
    }

    fn try_get_credentials(
        &self,
        request: &CredentialRequest,
        _timeout: Duration,
    ) -> Result<CredentialResponse> {
        let uri = request.uri.to_ascii_lowercase();
        let found = self
            .entries
            .iter()
            .filter(|(prefix, _)| uri.starts_with(&prefix.to_ascii_lowercase()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, credentials)| credentials.clone());
        Ok(match found {
            Some(credentials) => CredentialResponse::Provided(credentials),
            None => CredentialResponse::NotApplicable,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PluginOutput {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// External credential helper executable.
///
/// Invoked as `{path} {args..} -uri <uri> -nonInteractive -verbosity detailed
/// [-isRetry]`. Exit code 0 prints a JSON object with `Username` and
/// `Password`, 1 means the helper does not handle the url, 2 means it failed
/// and `Message` says why. The process is killed when the timeout expires.
#[derive(Debug, Clone)]
pub struct PluginCredentialProvider {
    name: String,
    path: PathBuf,
    args: Vec<String>,
}

impl PluginCredentialProvider {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            args: Vec::new(),
        }
    }

    /// Arguments passed ahead of the protocol arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self, request: &CredentialRequest) -> Command {
        let mut command = Command::new(&self.path);
        command
            .args(&self.args)
            .arg("-uri")
            .arg(&request.uri)
            .arg("-nonInteractive")
            .arg("-verbosity")
            .arg("detailed");
        if request.is_retry {
            command.arg("-isRetry");
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn timed_out(&self, child: &mut Child, request: &CredentialRequest, timeout: Duration) -> anyhow::Error {
        if let Err(err) = child.kill() {
            warn!(provider = %self.name, error = %err, "failed to kill credential provider");
        }
        let _ = child.wait();
        RestoreError::CredentialTimeout {
            provider: self.name.clone(),
            uri: request.uri.clone(),
            timeout,
        }
        .into()
    }
}

impl CredentialProvider for PluginCredentialProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_get_credentials(
        &self,
        request: &CredentialRequest,
        timeout: Duration,
    ) -> Result<CredentialResponse> {
        debug!(provider = %self.name, uri = %request.uri, "running credential provider");
        let mut child = self.command(request).spawn().with_context(|| {
            format!(
                "failed to start credential provider '{}': {}",
                self.name,
                self.path.display()
            )
        })?;

        let stdout = child.stdout.take().map(read_in_background);
        let stderr = child.stderr.take().map(read_in_background);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    return Err(self.timed_out(&mut child, request, timeout));
                }
                Ok(None) => thread::sleep(PLUGIN_POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(err).with_context(|| {
                        format!("failed waiting for credential provider '{}'", self.name)
                    });
                }
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now()).max(PLUGIN_POLL_INTERVAL);
        let stdout = collect_output(stdout, remaining);
        let stderr = collect_output(stderr, remaining);

        match status.code() {
            Some(0) => {
                let output: PluginOutput = serde_json::from_str(stdout.trim()).with_context(|| {
                    format!("credential provider '{}' returned invalid output", self.name)
                })?;
                match (output.username, output.password) {
                    (Some(username), Some(password)) => {
                        Ok(CredentialResponse::Provided(Credentials { username, password }))
                    }
                    _ => Err(RestoreError::CredentialAborted {
                        provider: self.name.clone(),
                        message: "response is missing Username or Password".to_string(),
                    }
                    .into()),
                }
            }
            Some(1) => Ok(CredentialResponse::NotApplicable),
            code => {
                let message = serde_json::from_str::<PluginOutput>(stdout.trim())
                    .ok()
                    .and_then(|output| output.message)
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| {
                        let stderr = stderr.trim();
                        match code {
                            Some(code) if stderr.is_empty() => format!("exited with status {code}"),
                            Some(code) => format!("exited with status {code}: {stderr}"),
                            None => "terminated by signal".to_string(),
                        }
                    });
                Err(RestoreError::CredentialAborted {
                    provider: self.name.clone(),
                    message,
                }
                .into())
            }
        }
    }
}

fn read_in_background<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = sender.send(String::from_utf8_lossy(&buf).to_string());
    });
    receiver
}

fn collect_output(receiver: Option<mpsc::Receiver<String>>, wait: Duration) -> String {
    receiver
        .and_then(|receiver| receiver.recv_timeout(wait).ok())
        .unwrap_or_default()
}

type PromptInput = Arc<Mutex<Box<dyn BufRead + Send>>>;

/// Interactive prompt for a user name and password.
///
/// Input is read on a helper thread so the prompt can honor its timeout.
/// Blocking reads cannot be interrupted, so after a timeout that thread
/// stays parked on the input until the console delivers a line or closes,
/// and it keeps the input locked until then. A later prompt waits behind
/// it and receives whatever the user types next.
pub struct ConsoleCredentialProvider {
    input: PromptInput,
    output: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ConsoleCredentialProvider {
    pub fn new(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            output: Arc::new(Mutex::new(output)),
        }
    }

    pub fn stdio() -> Self {
        Self::new(
            Box::new(std::io::BufReader::new(std::io::stdin())),
            Box::new(std::io::stderr()),
        )
    }

    fn prompt(&self, uri: &str) -> Result<()> {
        let mut output = self
            .output
            .lock()
            .map_err(|_| anyhow!("console output lock poisoned"))?;
        writeln!(output, "Please provide credentials for: {uri}")
            .context("failed to write credential prompt")?;
        output.flush().context("failed to write credential prompt")
    }
}

impl CredentialProvider for ConsoleCredentialProvider {
    fn name(&self) -> &str {
        "console"
    }

    fn try_get_credentials(
        &self,
        request: &CredentialRequest,
        timeout: Duration,
    ) -> Result<CredentialResponse> {
        if request.non_interactive {
            return Ok(CredentialResponse::NotApplicable);
        }
        self.prompt(&request.uri)?;

        let input = Arc::clone(&self.input);
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let result = (|| -> Result<(String, String)> {
                let mut input = input
                    .lock()
                    .map_err(|_| anyhow!("console input lock poisoned"))?;
                let mut username = String::new();
                let mut password = String::new();
                input.read_line(&mut username).context("failed to read user name")?;
                input.read_line(&mut password).context("failed to read password")?;
                Ok((username.trim().to_string(), password.trim_end().to_string()))
            })();
            let _ = sender.send(result);
        });

        match receiver.recv_timeout(timeout) {
            Ok(Ok((username, _))) if username.is_empty() => Ok(CredentialResponse::NotApplicable),
            Ok(Ok((username, password))) => {
                Ok(CredentialResponse::Provided(Credentials { username, password }))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(RestoreError::CredentialTimeout {
                provider: "console".to_string(),
                uri: request.uri.clone(),
                timeout,
            }
            .into()),
        }
    }
}

/// Ordered credential providers with a per-url cache.
#[derive(Default)]
pub struct CredentialService {
    providers: Vec<(Box<dyn CredentialProvider>, Duration)>,
    non_interactive: bool,
    cache: Mutex<HashMap<String, Credentials>>,
}

impl CredentialService {
    pub fn new(non_interactive: bool) -> Self {
        Self {
            providers: Vec::new(),
            non_interactive,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn CredentialProvider>, timeout: Duration) -> Self {
        self.providers.push((provider, timeout));
        self
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Credentials for `uri`. A retry bypasses the cache so providers can
    /// hand out fresh credentials after a rejected attempt.
    pub fn get_credentials(&self, uri: &str, is_retry: bool) -> Result<Option<Credentials>> {
        if !is_retry {
            let cache = self
                .cache
                .lock()
                .map_err(|_| anyhow!("credential cache lock poisoned"))?;
            if let Some(found) = cache.get(uri) {
                return Ok(Some(found.clone()));
            }
        }

        let request = CredentialRequest {
            uri: uri.to_string(),
            is_retry,
            non_interactive: self.non_interactive,
        };
        for (provider, timeout) in &self.providers {
            match provider.try_get_credentials(&request, *timeout)? {
                CredentialResponse::Provided(credentials) => {
                    debug!(provider = provider.name(), uri, "credentials acquired");
                    self.cache
                        .lock()
                        .map_err(|_| anyhow!("credential cache lock poisoned"))?
                        .insert(uri.to_string(), credentials.clone());
                    return Ok(Some(credentials));
                }
                CredentialResponse::NotApplicable => continue,
            }
        }
        Ok(None)
    }
}
