//! Sandboxed filesystem layer.
//!
//! Every operation validates its path against an immutable policy before any
//! syscall: a string-level `..` rejection (applied to the raw input, before
//! any resolution, so it holds independent of symlink behavior), base-root
//! containment, a deny-list, an extension allow-list for file paths, and a
//! size cap. Exactly one audit record is emitted per call, after the
//! operation completes and before the result is returned.
//!
//! Operations are independent; callers needing atomicity across calls must
//! serialize externally.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::audit::{self, AuditRecord};
use crate::config::SandboxConfig;
use crate::error::SandboxDenial;
use crate::{Error, Result};

/// Immutable sandbox policy: allowed roots, deny-list, extension allow-list,
/// size cap. Constructed once at startup, shared for the process lifetime.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    base_roots: Vec<PathBuf>,
    deny_list: Vec<PathBuf>,
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

impl SandboxPolicy {
    /// Build the policy from configuration. Extensions are lower-cased.
    #[must_use]
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            base_roots: config.base_roots.clone(),
            deny_list: config.deny_list.clone(),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            max_file_size: config.max_file_size,
        }
    }

    /// Size cap in bytes; zero means unbounded.
    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn size_ok(&self, len: u64) -> bool {
        self.max_file_size == 0 || len <= self.max_file_size
    }
}

/// Metadata for a single directory entry.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    /// Entry name
    pub name: String,
    /// Full path
    pub path: String,
    /// Size in bytes (zero for directories)
    pub size: u64,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Sandboxed filesystem operations over a fixed policy.
pub struct Sandbox {
    policy: SandboxPolicy,
}

impl Sandbox {
    /// Create a sandbox over the given policy.
    #[must_use]
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    /// Validate a path against the policy and return its normalized form.
    ///
    /// Directory mode (`for_directory = true`) skips the extension check.
    ///
    /// # Errors
    ///
    /// `Error::Sandbox` with reason `traversal`, `outside-base`, `denied`
    /// or `extension-not-allowed`.
    pub fn validate(&self, path: &str, for_directory: bool) -> Result<PathBuf> {
        // String-level rejection first: any parent-segment marker anywhere in
        // the raw input fails, even where lexical cleaning would remove it.
        if path.contains("..") {
            return Err(Error::sandbox(
                SandboxDenial::Traversal,
                format!("path contains parent marker: {path}"),
            ));
        }

        let normalized = normalize(Path::new(path));

        if !self
            .policy
            .base_roots
            .iter()
            .any(|root| normalized.starts_with(root))
        {
            return Err(Error::sandbox(
                SandboxDenial::OutsideBase,
                format!("path is outside all allowed roots: {path}"),
            ));
        }

        if let Some(denied) = self
            .policy
            .deny_list
            .iter()
            .find(|entry| normalized.starts_with(entry))
        {
            return Err(Error::sandbox(
                SandboxDenial::Denied,
                format!("path is denied by policy: {}", denied.display()),
            ));
        }

        if !for_directory && !self.policy.allowed_extensions.is_empty() {
            let extension = normalized
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            let allowed = extension
                .as_deref()
                .is_some_and(|e| self.policy.allowed_extensions.iter().any(|a| a == e));
            if !allowed {
                return Err(Error::sandbox(
                    SandboxDenial::ExtensionNotAllowed,
                    format!(
                        "extension {:?} is not allowed",
                        extension.unwrap_or_default()
                    ),
                ));
            }
        }

        Ok(normalized)
    }

    /// Read a file fully.
    ///
    /// # Errors
    ///
    /// Sandbox denials (including `too-large` when the file exceeds the cap)
    /// and IO errors.
    pub async fn read(&self, path: &str, user: &str) -> Result<Vec<u8>> {
        let result = self.read_inner(path).await;
        let detail = match &result {
            Ok(bytes) => format!("{} bytes", bytes.len()),
            Err(e) => denial_detail(e),
        };
        audit::emit(&AuditRecord::fs("fs.read", path, user, result.is_ok(), detail));
        result
    }

    async fn read_inner(&self, path: &str) -> Result<Vec<u8>> {
        let validated = self.validate(path, false)?;
        let meta = tokio::fs::metadata(&validated).await?;
        if !self.policy.size_ok(meta.len()) {
            return Err(Error::sandbox(
                SandboxDenial::TooLarge,
                format!("{} bytes exceeds cap", meta.len()),
            ));
        }
        Ok(tokio::fs::read(&validated).await?)
    }

    /// Write a file, creating intermediate directories with mode 0755.
    ///
    /// The size cap is enforced on the input length before the filesystem is
    /// touched.
    ///
    /// # Errors
    ///
    /// Sandbox denials and IO errors.
    pub async fn write(&self, path: &str, user: &str, contents: &[u8]) -> Result<()> {
        let result = self.write_inner(path, contents).await;
        let detail = match &result {
            Ok(()) => format!("{} bytes", contents.len()),
            Err(e) => denial_detail(e),
        };
        audit::emit(&AuditRecord::fs(
            "fs.write",
            path,
            user,
            result.is_ok(),
            detail,
        ));
        result
    }

    async fn write_inner(&self, path: &str, contents: &[u8]) -> Result<()> {
        let validated = self.validate(path, false)?;
        if !self.policy.size_ok(contents.len() as u64) {
            return Err(Error::sandbox(
                SandboxDenial::TooLarge,
                format!("{} bytes exceeds cap", contents.len()),
            ));
        }
        if let Some(parent) = validated.parent() {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o755);
            builder.create(parent).await?;
        }
        tokio::fs::write(&validated, contents).await?;
        Ok(())
    }

    /// List a directory.
    ///
    /// Uses directory-mode validation: no extension check.
    ///
    /// # Errors
    ///
    /// Sandbox denials and IO errors.
    pub async fn list(&self, path: &str, user: &str) -> Result<Vec<FileInfo>> {
        let result = self.list_inner(path).await;
        let detail = match &result {
            Ok(entries) => format!("{} entries", entries.len()),
            Err(e) => denial_detail(e),
        };
        audit::emit(&AuditRecord::fs("fs.list", path, user, result.is_ok(), detail));
        result
    }

    async fn list_inner(&self, path: &str) -> Result<Vec<FileInfo>> {
        let validated = self.validate(path, true)?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&validated).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(FileInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_string_lossy().into_owned(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_dir: meta.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Copy a file. Both ends are validated; the cap is checked against the
    /// source's stat. A failure mid-copy leaves the destination unspecified.
    ///
    /// # Errors
    ///
    /// Sandbox denials and IO errors.
    pub async fn copy(&self, src: &str, dst: &str, user: &str) -> Result<u64> {
        let result = self.copy_inner(src, dst).await;
        let detail = match &result {
            Ok(n) => format!("{n} bytes"),
            Err(e) => denial_detail(e),
        };
        audit::emit(&AuditRecord::fs_copy(src, dst, user, result.is_ok(), detail));
        result
    }

    async fn copy_inner(&self, src: &str, dst: &str) -> Result<u64> {
        let src_path = self.validate(src, false)?;
        let dst_path = self.validate(dst, false)?;
        let meta = tokio::fs::metadata(&src_path).await?;
        if !self.policy.size_ok(meta.len()) {
            return Err(Error::sandbox(
                SandboxDenial::TooLarge,
                format!("{} bytes exceeds cap", meta.len()),
            ));
        }
        Ok(tokio::fs::copy(&src_path, &dst_path).await?)
    }
}

/// Lexically normalize a path: drop `.` components and redundant separators.
/// Parent markers never reach this point; `validate` rejects them first.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn denial_detail(error: &Error) -> String {
    match error {
        Error::Sandbox { reason, .. } => reason.as_str().to_string(),
        Error::Io(e) => format!("io: {}", e.kind()),
        other => format!("{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_with(config: SandboxConfig) -> Sandbox {
        Sandbox::new(SandboxPolicy::from_config(&config))
    }

    fn default_sandbox(root: &Path) -> Sandbox {
        sandbox_with(SandboxConfig {
            base_roots: vec![root.to_path_buf()],
            deny_list: vec![root.join("private")],
            allowed_extensions: vec!["txt".to_string(), "md".to_string()],
            max_file_size: 64,
        })
    }

    #[test]
    fn traversal_is_rejected_before_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());

        // Any `..` anywhere fails, even when cleaning would keep it inside
        for path in [
            "/tmp/../etc/passwd",
            &format!("{}/a/../b.txt", dir.path().display()),
            "..",
            "/tmp/file..txt",
        ] {
            let err = sandbox.validate(path, false).unwrap_err();
            assert!(
                matches!(err, Error::Sandbox { reason: SandboxDenial::Traversal, .. }),
                "expected traversal for {path}, got {err}"
            );
        }
    }

    #[test]
    fn outside_base_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        let err = sandbox.validate("/etc/passwd.txt", false).unwrap_err();
        assert!(matches!(
            err,
            Error::Sandbox {
                reason: SandboxDenial::OutsideBase,
                ..
            }
        ));
        // Relative paths are never inside an absolute root
        let err = sandbox.validate("notes.txt", false).unwrap_err();
        assert!(matches!(
            err,
            Error::Sandbox {
                reason: SandboxDenial::OutsideBase,
                ..
            }
        ));
    }

    #[test]
    fn deny_list_entry_and_descendants_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        let inside = format!("{}/private/keys.txt", dir.path().display());
        let err = sandbox.validate(&inside, false).unwrap_err();
        assert!(matches!(
            err,
            Error::Sandbox {
                reason: SandboxDenial::Denied,
                ..
            }
        ));
    }

    #[test]
    fn extension_allow_list_applies_to_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        let exe = format!("{}/tool.exe", dir.path().display());
        let err = sandbox.validate(&exe, false).unwrap_err();
        assert!(matches!(
            err,
            Error::Sandbox {
                reason: SandboxDenial::ExtensionNotAllowed,
                ..
            }
        ));

        // Uppercase extension is normalized
        let upper = format!("{}/NOTES.TXT", dir.path().display());
        assert!(sandbox.validate(&upper, false).is_ok());

        // No extension at all fails when an allow-list is configured
        let bare = format!("{}/Makefile", dir.path().display());
        assert!(sandbox.validate(&bare, false).is_err());

        // Directory mode skips the check
        assert!(sandbox.validate(&format!("{}/sub", dir.path().display()), true).is_ok());
    }

    #[test]
    fn empty_allow_list_means_any_extension() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_with(SandboxConfig {
            base_roots: vec![dir.path().to_path_buf()],
            deny_list: vec![],
            allowed_extensions: vec![],
            max_file_size: 0,
        });
        let exe = format!("{}/tool.exe", dir.path().display());
        assert!(sandbox.validate(&exe, false).is_ok());
    }

    #[tokio::test]
    async fn write_at_cap_succeeds_and_cap_plus_one_fails() {
        // GIVEN: a 64-byte cap
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        let path = format!("{}/exact.txt", dir.path().display());

        // WHEN/THEN: exactly at the cap succeeds
        sandbox.write(&path, "alice", &[b'x'; 64]).await.unwrap();

        // cap + 1 fails without touching the file system
        let over = format!("{}/over.txt", dir.path().display());
        let err = sandbox.write(&over, "alice", &[b'x'; 65]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Sandbox {
                reason: SandboxDenial::TooLarge,
                ..
            }
        ));
        assert!(!Path::new(&over).exists());
    }

    #[tokio::test]
    async fn read_rejects_files_over_cap() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        let path = dir.path().join("big.txt");
        std::fs::write(&path, vec![b'y'; 65]).unwrap();

        let err = sandbox
            .read(&path.to_string_lossy(), "alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Sandbox {
                reason: SandboxDenial::TooLarge,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        let path = format!("{}/nested/deep/note.md", dir.path().display());

        sandbox.write(&path, "alice", b"hello").await.unwrap();
        let bytes = sandbox.read(&path, "alice").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn list_returns_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = sandbox
            .list(&dir.path().to_string_lossy(), "alice")
            .await
            .unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert!(entries[2].is_dir);
    }

    #[tokio::test]
    async fn copy_validates_both_ends() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = default_sandbox(dir.path());
        let src = dir.path().join("src.txt");
        std::fs::write(&src, "data").unwrap();

        // Destination with a bad extension is denied
        let err = sandbox
            .copy(
                &src.to_string_lossy(),
                &format!("{}/dst.exe", dir.path().display()),
                "alice",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Sandbox {
                reason: SandboxDenial::ExtensionNotAllowed,
                ..
            }
        ));

        // Valid copy round-trips
        let dst = format!("{}/dst.txt", dir.path().display());
        let n = sandbox.copy(&src.to_string_lossy(), &dst, "alice").await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "data");
    }
}
