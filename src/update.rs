//! Self-update: compare against the release bucket's `VERSION`, download the
//! platform artifact and swap it in place of the running executable.
//!
//! The swap keeps the previous binary at `<target>.bak` until the new one is
//! complete, so at any instant one of the two is recoverable:
//!
//! 1. rename `target` to `target.bak`
//! 2. stream the artifact into a fresh `target` (mode 0755), hashing as it goes
//! 3. verify the checksum, unpack `.tgz` artifacts in place
//! 4. reassert 0755, remove `target.bak`
//!
//! Any failure after step 1 deletes the partial `target` and renames the
//! backup back.

use std::ffi::c_int;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use semver::Version;
use sha2::{Digest, Sha256};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_RELEASE_URL: &str = "https://download.binocs.sh/";
pub const BINARY_TEMPLATE: &str = "v{{VERSION}}/binocs_{{VERSION}}_{{OS}}_{{ARCH}}";
pub const ARCHIVE_TEMPLATE: &str = "v{{VERSION}}/binocs_{{VERSION}}_{{OS}}_{{ARCH}}.tgz";
const VERSION_PATH: &str = "VERSION";
const CHECKSUM_SUFFIX: &str = ".sha256";

/// Artifacts can be tens of megabytes; the 30s API deadline is too tight.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("local version '{0}' is not a valid semantic version")]
    InvalidLocalVersion(String),
    #[error("release server returned an invalid version '{0}'")]
    InvalidRemoteVersion(String),
    #[error("release server returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("failed to reach release server: {0}")]
    Network(#[from] reqwest::Error),
    #[error("could not locate the running executable: {0}")]
    CurrentExe(#[source] io::Error),
    #[error("executable {0} does not exist")]
    MissingTarget(PathBuf),
    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("malformed release archive: {0}")]
    Format(String),
    #[error("malformed checksum file at {0}")]
    MalformedChecksum(String),
    #[error("checksum mismatch: expected {expected}, downloaded {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("upgrade interrupted")]
    Interrupted,
    #[error("{cause}; restoring the previous binary also failed ({rollback}), it is kept at {backup}")]
    RollbackFailed {
        cause: Box<UpdateError>,
        rollback: io::Error,
        backup: PathBuf,
    },
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> UpdateError + 'a {
    move |source| UpdateError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// Result of comparing the local build against the release bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub local: Version,
    pub remote: Version,
}

impl Availability {
    pub fn is_newer(&self) -> bool {
        self.remote > self.local
    }
}

/// Everything needed to fetch one platform artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: Version,
    pub download_url: String,
    pub checksum_url: Option<String>,
    pub archive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate(Availability),
    Updated(Version),
}

/// Parse `v1.2.3` or `1.2.3`.
pub fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}

/// Substitute `{{VERSION}}`, `{{OS}}` and `{{ARCH}}` into `template`.
pub fn render_template(template: &str, version: &Version, os: &str, arch: &str) -> String {
    template
        .replace("{{VERSION}}", &version.to_string())
        .replace("{{OS}}", os)
        .replace("{{ARCH}}", arch)
}

#[derive(Clone)]
pub struct Updater {
    client: Client,
    base_url: String,
    current_version: String,
    binary_template: String,
    verify_checksum: bool,
    executable: Option<PathBuf>,
    check_timeout: Option<Duration>,
}

impl Updater {
    pub fn new(client: Client, base_url: &str, current_version: &str) -> Self {
        Updater {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            current_version: current_version.to_string(),
            binary_template: BINARY_TEMPLATE.to_string(),
            verify_checksum: true,
            executable: None,
            check_timeout: None,
        }
    }

    pub fn with_binary_template(mut self, template: &str) -> Self {
        self.binary_template = template.to_string();
        self
    }

    pub fn with_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// Replace this path instead of the running executable.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Tighter deadline for the `VERSION` fetch, used by the passive check.
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn is_update_available(&self) -> Result<Availability, UpdateError> {
        let local = parse_version(&self.current_version)
            .ok_or_else(|| UpdateError::InvalidLocalVersion(self.current_version.clone()))?;

        let url = self.url(VERSION_PATH);
        let mut request = self.client.get(&url);
        if let Some(timeout) = self.check_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send()?;
        if !response.status().is_success() {
            return Err(UpdateError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        let body = response.text()?;
        let remote =
            parse_version(&body).ok_or_else(|| UpdateError::InvalidRemoteVersion(body.trim().to_string()))?;

        debug!(%local, %remote, "compared versions");
        Ok(Availability { local, remote })
    }

    /// Descriptor for `version` on the platform this binary was built for.
    pub fn release_for(&self, version: &Version) -> Release {
        let mut path = render_template(
            &self.binary_template,
            version,
            std::env::consts::OS,
            std::env::consts::ARCH,
        );
        if cfg!(windows) {
            path.push_str(".exe");
        }
        let download_url = self.url(&path);
        Release {
            version: version.clone(),
            checksum_url: self
                .verify_checksum
                .then(|| format!("{download_url}{CHECKSUM_SUFFIX}")),
            archive: download_url.ends_with(".tgz"),
            download_url,
        }
    }

    /// Symlink-resolved path of the executable to replace.
    pub fn resolve_target(&self) -> Result<PathBuf, UpdateError> {
        let exe = match &self.executable {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(UpdateError::CurrentExe)?,
        };
        match fs::canonicalize(&exe) {
            Ok(target) if target.is_file() => Ok(target),
            Ok(target) => Err(UpdateError::MissingTarget(target)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(UpdateError::MissingTarget(exe)),
            Err(e) => Err(io_err("resolve", &exe)(e)),
        }
    }

    /// Replace the executable with the newest release, if it is newer.
    pub fn auto_update(&self) -> Result<UpdateOutcome, UpdateError> {
        debug!(state = "checking");
        let availability = self.is_update_available()?;
        if !availability.is_newer() {
            debug!(state = "up-to-date");
            return Ok(UpdateOutcome::UpToDate(availability));
        }

        let release = self.release_for(&availability.remote);
        let target = self.resolve_target()?;
        let backup = backup_path(&target);
        let interrupt = InterruptGuard::install()?;

        fs::rename(&target, &backup).map_err(io_err("back up", &target))?;

        if let Err(cause) = self.install(&release, &target, &interrupt) {
            warn!(error = %cause, target = %target.display(), "upgrade failed, rolling back");
            return Err(rollback(&target, &backup, cause));
        }

        if let Err(e) = fs::remove_file(&backup) {
            warn!(error = %e, backup = %backup.display(), "could not remove backup");
        }
        debug!(state = "done", version = %release.version);
        Ok(UpdateOutcome::Updated(release.version))
    }

    fn install(
        &self,
        release: &Release,
        target: &Path,
        interrupt: &InterruptGuard,
    ) -> Result<(), UpdateError> {
        debug!(state = "downloading", url = %release.download_url);
        let digest = self.download(&release.download_url, target, interrupt)?;

        if let Some(url) = &release.checksum_url {
            let expected = self.fetch_checksum(url)?;
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(UpdateError::ChecksumMismatch {
                    expected,
                    actual: digest,
                });
            }
        }

        if release.archive {
            debug!(state = "extracting");
            extract_in_place(target)?;
            interrupt.check()?;
        }

        debug!(state = "finalizing");
        set_executable(target)?;
        interrupt.check()
    }

    /// Stream `url` into a new file at `target`; returns the hex SHA-256.
    /// A pending interrupt is honoured between chunks.
    fn download(
        &self,
        url: &str,
        target: &Path,
        interrupt: &InterruptGuard,
    ) -> Result<String, UpdateError> {
        let mut response = self.client.get(url).timeout(DOWNLOAD_TIMEOUT).send()?;
        if !response.status().is_success() {
            return Err(UpdateError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let file = create_executable(target).map_err(io_err("create", target))?;
        let mut writer = HashingWriter::new(file);
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            interrupt.check()?;
            let n = match response.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err("download to", target)(e)),
            };
            writer
                .write_all(&chunk[..n])
                .map_err(io_err("download to", target))?;
        }
        let (file, digest) = writer.finish();
        file.sync_all().map_err(io_err("sync", target))?;
        Ok(digest)
    }

    fn fetch_checksum(&self, url: &str) -> Result<String, UpdateError> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(UpdateError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text()?;
        // `sha256sum` format: "<hex>  <file name>"
        body.split_whitespace()
            .next()
            .filter(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| UpdateError::MalformedChecksum(url.to_string()))
    }
}

/// `<target>.bak` in the same directory, so the rename never crosses filesystems.
pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    target.with_file_name(name)
}

fn rollback(target: &Path, backup: &Path, cause: UpdateError) -> UpdateError {
    debug!(state = "rolling-back");
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "could not remove partial download"),
    }
    match fs::rename(backup, target) {
        Ok(()) => cause,
        Err(rollback) => UpdateError::RollbackFailed {
            cause: Box::new(cause),
            rollback,
            backup: backup.to_path_buf(),
        },
    }
}

/// Replace the contents of `target` (a gzip-wrapped tar) with its first entry.
fn extract_in_place(target: &Path) -> Result<(), UpdateError> {
    let bytes = {
        let file = File::open(target).map_err(io_err("open", target))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut entries = archive
            .entries()
            .map_err(|e| UpdateError::Format(e.to_string()))?;
        let mut entry = entries
            .next()
            .ok_or_else(|| UpdateError::Format("archive is empty".to_string()))?
            .map_err(|e| UpdateError::Format(e.to_string()))?;

        let kind = entry.header().entry_type();
        if !kind.is_file() {
            return Err(UpdateError::Format(format!(
                "first entry is not a regular file ({kind:?})"
            )));
        }
        let declared = entry.size();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| UpdateError::Format(e.to_string()))?;
        if bytes.len() as u64 != declared {
            return Err(UpdateError::Format(format!(
                "first entry is truncated ({} of {declared} bytes)",
                bytes.len()
            )));
        }
        bytes
    };

    let mut file = create_executable(target).map_err(io_err("rewrite", target))?;
    file.write_all(&bytes).map_err(io_err("rewrite", target))?;
    file.sync_all().map_err(io_err("sync", target))
}

#[cfg(unix)]
fn create_executable(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(path)
}

#[cfg(not(unix))]
fn create_executable(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), UpdateError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(io_err("chmod", path))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), UpdateError> {
    Ok(())
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> (W, String) {
        (self.inner, format!("{:x}", self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

const GUARDED_SIGNALS: [c_int; 2] = [SIGINT, SIGTERM];

/// Turns SIGINT/SIGTERM into a flag while the executable is being swapped,
/// so the first signal only stops the attempt between steps. A second one
/// exits immediately.
struct InterruptGuard {
    flag: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl InterruptGuard {
    fn install() -> Result<Self, UpdateError> {
        let mut guard = InterruptGuard {
            flag: Arc::new(AtomicBool::new(false)),
            ids: Vec::new(),
        };
        for signal in GUARDED_SIGNALS {
            let handler_err = |source: io::Error| UpdateError::Io {
                op: "install signal handler for",
                path: PathBuf::from(format!("signal {signal}")),
                source,
            };
            // Registered first, so it only sees the flag set by an earlier signal.
            let shutdown =
                signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&guard.flag))
                    .map_err(handler_err)?;
            guard.ids.push(shutdown);
            let id = signal_hook::flag::register(signal, Arc::clone(&guard.flag))
                .map_err(handler_err)?;
            guard.ids.push(id);
        }
        Ok(guard)
    }

    fn check(&self) -> Result<(), UpdateError> {
        if self.flag.load(Ordering::SeqCst) {
            Err(UpdateError::Interrupted)
        } else {
            Ok(())
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        for id in self.ids.drain(..) {
            let _ = signal_hook::low_level::unregister(id);
        }
        // Unregistering leaves signal-hook's handler in place, which would
        // swallow later signals; fall back to the default action instead.
        for signal in GUARDED_SIGNALS {
            let always = Arc::new(AtomicBool::new(true));
            if let Err(e) = signal_hook::flag::register_conditional_default(signal, always) {
                warn!(error = %e, signal, "could not restore default signal handling");
            }
        }
    }
}
