//! File provider
//!
//! A file's state is its blake3 content hash plus mode, owner and group.
//! Content is written to a sibling temp file and renamed into place, so a
//! reader never sees a half-written config.

use declarative::{
    ApplyContext, Error, FileContent, FileEnsure, FileSpec, Provider, Resource, ResourceKind,
    ResourceState, Result,
};
use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::io::{self, Write};
use std::mem::MaybeUninit;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::retry::{RetryConfig, with_retry};

/// Upper bound for a downloaded file (repository keys are a few KiB)
const MAX_DOWNLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// What is on disk right now
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileFacts {
    hash: String,
    mode: u32,
    uid: u32,
    gid: u32,
}

impl FileFacts {
    fn observe(path: &Path) -> Result<Option<Self>> {
        // Follow links: mode and owner must describe the bytes we hash
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file_write(path, &e)),
        };
        if meta.is_dir() {
            return Err(Error::FileWrite {
                path: path.to_path_buf(),
                message: "is a directory".to_string(),
            });
        }
        let content = fs::read(path).map_err(|e| Error::file_write(path, &e))?;
        Ok(Some(Self {
            hash: hash(&content),
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
        }))
    }
}

pub struct FileProvider {
    agent: ureq::Agent,
    retry: RetryConfig,
    timeout: Option<Duration>,
    /// Downloads are fetched once per run
    downloads: Mutex<HashMap<String, Vec<u8>>>,
}

impl FileProvider {
    /// `timeout` bounds each download, connect to last byte
    pub fn new(retry: RetryConfig, timeout: Option<Duration>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .build()
            .into();
        Self {
            agent,
            retry,
            timeout,
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// The bytes the file should hold, if the declaration manages content
    pub fn desired_content(&self, spec: &FileSpec) -> Result<Option<Vec<u8>>> {
        match &spec.content {
            None => Ok(None),
            Some(FileContent::Literal(text)) => Ok(Some(text.as_bytes().to_vec())),
            Some(FileContent::Source(source)) => fs::read(source)
                .map(Some)
                .map_err(|e| Error::FileWrite {
                    path: spec.path.clone(),
                    message: format!("cannot read source {}: {e}", source.display()),
                }),
            Some(FileContent::Url(url)) => self.download(&spec.path, url).map(Some),
        }
    }

    fn download(&self, path: &Path, url: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cached(url) {
            return Ok(bytes);
        }

        let bytes = with_retry(&self.retry, url, || self.fetch(path, url))?;
        if let Ok(mut cache) = self.downloads.lock() {
            cache.insert(url.to_string(), bytes.clone());
        }
        Ok(bytes)
    }

    fn cached(&self, url: &str) -> Option<Vec<u8>> {
        self.downloads.lock().ok()?.get(url).cloned()
    }

    fn fetch(&self, path: &Path, url: &str) -> Result<Vec<u8>> {
        log::debug!("downloading {url}");
        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", "varnish-converge")
            .call()
            .map_err(|e| download_error(path, url, self.timeout, e))?;

        response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .read_to_vec()
            .map_err(|e| download_error(path, url, self.timeout, e))
    }

    fn content_differs(&self, spec: &FileSpec, facts: &FileFacts) -> Result<bool> {
        if !spec.replace {
            return Ok(false);
        }
        Ok(match self.desired_content(spec)? {
            Some(content) => hash(&content) != facts.hash,
            None => false,
        })
    }

    fn ensure_present(&self, spec: &FileSpec) -> Result<()> {
        let path = &spec.path;
        let facts = FileFacts::observe(path)?;

        let write = match &facts {
            None => true,
            Some(facts) => self.content_differs(spec, facts)?,
        };
        if write {
            let content = self.desired_content(spec)?.unwrap_or_default();
            write_atomic(path, &content, spec.mode.unwrap_or(0o644))
                .map_err(|e| Error::file_write(path, &e))?;
            log::debug!("wrote {} ({} bytes)", path.display(), content.len());
        }

        if let Some(mode) = spec.mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
                .map_err(|e| Error::file_write(path, &e))?;
        }

        let (uid, gid) = owner_ids(spec)?;
        if uid.is_some() || gid.is_some() {
            std::os::unix::fs::chown(path, uid, gid).map_err(|e| Error::file_write(path, &e))?;
        }
        Ok(())
    }
}

impl Provider for FileProvider {
    fn kind(&self) -> ResourceKind {
        ResourceKind::File
    }

    fn current_state(&self, resource: &Resource, _ctx: &ApplyContext) -> Result<ResourceState> {
        let spec = resource.as_file()?;
        Ok(match FileFacts::observe(&spec.path)? {
            None => ResourceState::Absent,
            Some(facts) => ResourceState::Present {
                details: Some(format!(
                    "blake3:{} mode:{:04o} uid:{} gid:{}",
                    short(&facts.hash),
                    facts.mode,
                    facts.uid,
                    facts.gid
                )),
            },
        })
    }

    fn desired_state(&self, resource: &Resource) -> Result<ResourceState> {
        let spec = resource.as_file()?;
        if spec.ensure == FileEnsure::Absent {
            return Ok(ResourceState::Absent);
        }

        let mut parts = Vec::new();
        if let Some(content) = self.desired_content(spec)? {
            parts.push(format!("blake3:{}", short(&hash(&content))));
        }
        if let Some(mode) = spec.mode {
            parts.push(format!("mode:{mode:04o}"));
        }
        let (uid, gid) = owner_ids(spec)?;
        if let Some(uid) = uid {
            parts.push(format!("uid:{uid}"));
        }
        if let Some(gid) = gid {
            parts.push(format!("gid:{gid}"));
        }
        Ok(ResourceState::Present {
            details: (!parts.is_empty()).then(|| parts.join(" ")),
        })
    }

    fn needs_apply(&self, resource: &Resource, _ctx: &ApplyContext) -> Result<bool> {
        let spec = resource.as_file()?;
        let facts = FileFacts::observe(&spec.path)?;

        let Some(facts) = facts else {
            return Ok(spec.ensure == FileEnsure::Present);
        };
        if spec.ensure == FileEnsure::Absent {
            return Ok(true);
        }

        if self.content_differs(spec, &facts)? {
            return Ok(true);
        }
        if spec.mode.is_some_and(|mode| mode != facts.mode) {
            return Ok(true);
        }
        let (uid, gid) = owner_ids(spec)?;
        Ok(uid.is_some_and(|uid| uid != facts.uid) || gid.is_some_and(|gid| gid != facts.gid))
    }

    fn apply(&self, resource: &Resource, _ctx: &ApplyContext) -> Result<()> {
        let spec = resource.as_file()?;
        match spec.ensure {
            FileEnsure::Present => self.ensure_present(spec),
            FileEnsure::Absent => match fs::remove_file(&spec.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::file_write(&spec.path, &e)),
            },
        }
    }
}

fn hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Write `content` to a temp file next to `path`, then rename over it
fn write_atomic(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp: PathBuf = parent.join(format!(".{file_name}.converge-tmp"));

    let result = (|| {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn download_error(path: &Path, url: &str, timeout: Option<Duration>, err: ureq::Error) -> Error {
    match err {
        ureq::Error::Timeout(_) => Error::Timeout {
            command: format!("GET {url}"),
            after: timeout.unwrap_or_default(),
        },
        ureq::Error::StatusCode(code) if code < 500 => Error::FileWrite {
            path: path.to_path_buf(),
            message: format!("download of {url} failed: HTTP {code}"),
        },
        other => Error::Network {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

fn owner_ids(spec: &FileSpec) -> Result<(Option<u32>, Option<u32>)> {
    let unknown = |what: &str, name: &str| Error::FileWrite {
        path: spec.path.clone(),
        message: format!("unknown {what} '{name}'"),
    };
    let uid = match &spec.owner {
        Some(name) => Some(lookup_uid(name).ok_or_else(|| unknown("user", name))?),
        None => None,
    };
    let gid = match &spec.group {
        Some(name) => Some(lookup_gid(name).ok_or_else(|| unknown("group", name))?),
        None => None,
    };
    Ok((uid, gid))
}

/// Resolve a user name (or numeric uid) with the reentrant libc lookup
fn lookup_uid(name: &str) -> Option<u32> {
    if let Ok(uid) = name.parse() {
        return Some(uid);
    }
    let c_name = CString::new(name).ok()?;
    let mut buf = vec![0 as libc::c_char; 16 * 1024];
    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut found: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: every pointer is valid for the duration of the call and
    // buf.len() is the real buffer size
    let rc = unsafe {
        libc::getpwnam_r(
            c_name.as_ptr(),
            pwd.as_mut_ptr(),
            buf.as_mut_ptr(),
            buf.len(),
            &raw mut found,
        )
    };
    if rc != 0 || found.is_null() {
        return None;
    }
    // SAFETY: a non-null result means pwd was filled in
    Some(unsafe { pwd.assume_init() }.pw_uid)
}

/// Resolve a group name (or numeric gid) with the reentrant libc lookup
fn lookup_gid(name: &str) -> Option<u32> {
    if let Ok(gid) = name.parse() {
        return Some(gid);
    }
    let c_name = CString::new(name).ok()?;
    let mut buf = vec![0 as libc::c_char; 16 * 1024];
    let mut grp = MaybeUninit::<libc::group>::uninit();
    let mut found: *mut libc::group = std::ptr::null_mut();

    // SAFETY: as in lookup_uid
    let rc = unsafe {
        libc::getgrnam_r(
            c_name.as_ptr(),
            grp.as_mut_ptr(),
            buf.as_mut_ptr(),
            buf.len(),
            &raw mut found,
        )
    };
    if rc != 0 || found.is_null() {
        return None;
    }
    // SAFETY: a non-null result means grp was filled in
    Some(unsafe { grp.assume_init() }.gr_gid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider() -> FileProvider {
        FileProvider::new(RetryConfig::no_retry(), None)
    }

    fn ctx() -> ApplyContext {
        ApplyContext::default()
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn test_write_then_in_sync() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc/default/varnish");
        let r = Resource::file(FileSpec::new(&path).content("START=yes\n").mode(0o644));
        let p = provider();

        assert_eq!(p.current_state(&r, &ctx()).unwrap(), ResourceState::Absent);
        assert!(p.needs_apply(&r, &ctx()).unwrap());
        p.apply(&r, &ctx()).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "START=yes\n");
        assert_eq!(mode_of(&path), 0o644);
        assert!(!p.needs_apply(&r, &ctx()).unwrap());
        assert!(!dir.path().join("etc/default/.varnish.converge-tmp").exists());
    }

    #[test]
    fn test_content_drift_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("varnish");
        fs::write(&path, "START=no\n").unwrap();
        let r = Resource::file(FileSpec::new(&path).content("START=yes\n"));
        let p = provider();

        assert!(p.needs_apply(&r, &ctx()).unwrap());
        p.apply(&r, &ctx()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "START=yes\n");
    }

    #[test]
    fn test_mode_drift_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret");
        fs::write(&path, "s3cr3t").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let r = Resource::file(FileSpec::new(&path).content("s3cr3t").mode(0o600));
        let p = provider();

        assert!(p.needs_apply(&r, &ctx()).unwrap());
        p.apply(&r, &ctx()).unwrap();
        assert_eq!(mode_of(&path), 0o600);
        assert!(!p.needs_apply(&r, &ctx()).unwrap());
    }

    #[test]
    fn test_owner_by_numeric_id() {
        let dir = TempDir::new().unwrap();
        let meta = fs::metadata(dir.path()).unwrap();
        let path = dir.path().join("owned");
        let r = Resource::file(
            FileSpec::new(&path)
                .content("x")
                .owner(meta.uid().to_string())
                .group(meta.gid().to_string()),
        );
        let p = provider();

        p.apply(&r, &ctx()).unwrap();
        assert!(!p.needs_apply(&r, &ctx()).unwrap());
        assert!(matches!(
            p.desired_state(&r).unwrap(),
            ResourceState::Present { details: Some(d) } if d.contains(&format!("uid:{}", meta.uid()))
        ));
    }

    #[test]
    fn test_unknown_owner() {
        let dir = TempDir::new().unwrap();
        let r = Resource::file(
            FileSpec::new(dir.path().join("f"))
                .content("x")
                .owner("no-such-user-varnish-converge"),
        );
        let err = provider().apply(&r, &ctx()).unwrap_err();
        assert!(matches!(err, Error::FileWrite { message, .. } if message.contains("unknown user")));
    }

    #[test]
    fn test_copy_from_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("site.vcl");
        let target = dir.path().join("default.vcl");
        fs::write(&source, "vcl 4.1;\n").unwrap();
        let r = Resource::file(FileSpec::new(&target).source(&source));
        let p = provider();

        p.apply(&r, &ctx()).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "vcl 4.1;\n");
        assert!(!p.needs_apply(&r, &ctx()).unwrap());

        fs::write(&source, "vcl 4.1;\nbackend default { .host = \"127.0.0.1\"; }\n").unwrap();
        assert!(p.needs_apply(&r, &ctx()).unwrap());
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let r = Resource::file(
            FileSpec::new(dir.path().join("default.vcl")).source(dir.path().join("missing.vcl")),
        );
        let err = provider().apply(&r, &ctx()).unwrap_err();
        assert!(matches!(err, Error::FileWrite { message, .. } if message.contains("cannot read source")));
    }

    #[test]
    fn test_no_replace_keeps_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret");
        fs::write(&path, "old").unwrap();
        let r = Resource::file(FileSpec::new(&path).content("new").mode(0o600).no_replace());
        let p = provider();

        assert!(p.needs_apply(&r, &ctx()).unwrap());
        p.apply(&r, &ctx()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert_eq!(mode_of(&path), 0o600);
        assert!(!p.needs_apply(&r, &ctx()).unwrap());
    }

    #[test]
    fn test_no_replace_writes_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret");
        let r = Resource::file(FileSpec::new(&path).content("generated").no_replace());
        provider().apply(&r, &ctx()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "generated");
    }

    #[test]
    fn test_absent_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stale.list");
        fs::write(&path, "deb http://old stable main\n").unwrap();
        let r = Resource::file(FileSpec::new(&path).absent());
        let p = provider();

        assert!(p.needs_apply(&r, &ctx()).unwrap());
        p.apply(&r, &ctx()).unwrap();
        assert!(!path.exists());
        assert!(!p.needs_apply(&r, &ctx()).unwrap());
        p.apply(&r, &ctx()).unwrap();
    }

    #[test]
    fn test_directory_in_the_way() {
        let dir = TempDir::new().unwrap();
        let r = Resource::file(FileSpec::new(dir.path()).content("x"));
        assert!(matches!(
            provider().needs_apply(&r, &ctx()),
            Err(Error::FileWrite { .. })
        ));
    }

    #[test]
    fn test_symlinked_file_reports_target_mode() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("default.vcl.real");
        let link = dir.path().join("default.vcl");
        fs::write(&target, "vcl 4.1;\n").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o644)).unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let r = Resource::file(FileSpec::new(&link).content("vcl 4.1;\n").mode(0o644));

        assert!(!provider().needs_apply(&r, &ctx()).unwrap());
    }

    #[test]
    fn test_stalled_download_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(3));
        });

        let dir = TempDir::new().unwrap();
        let spec = FileSpec::new(dir.path().join("varnish-cache.key"))
            .url(format!("http://{addr}/gpgkey"));
        let p = FileProvider::new(RetryConfig::no_retry(), Some(Duration::from_millis(300)));

        let started = std::time::Instant::now();
        let err = p.desired_content(&spec).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        server.join().unwrap();
    }

    #[test]
    fn test_lookup_root() {
        assert_eq!(lookup_uid("root"), Some(0));
        assert_eq!(lookup_gid("0"), Some(0));
        assert_eq!(lookup_uid("no-such-user-varnish-converge"), None);
    }
}
