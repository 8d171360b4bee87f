//! File metadata and content probe

use async_trait::async_trait;
use pgstig_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
    Missing,
}

/// Ownership and permission facts for one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub path: String,
    pub exists: bool,
    pub kind: FileKind,
    pub owner: String,
    pub group: String,
    /// Permission bits, including setuid/setgid/sticky
    pub mode: u32,
}

impl FileStat {
    /// Stat of a path that does not exist
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exists: false,
            kind: FileKind::Missing,
            owner: String::new(),
            group: String::new(),
            mode: 0,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Mode rendered as four octal digits, e.g. `0600`
    pub fn mode_octal(&self) -> String {
        format!("{:04o}", self.mode & 0o7777)
    }
}

/// Reads file metadata and content on the target host
#[async_trait]
pub trait FileProbe: Send + Sync {
    /// Stat a path; a missing path is reported through `exists`, not as an error
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Read a file as UTF-8 text
    async fn read(&self, path: &str) -> Result<String>;

    /// Regular files under a directory, recursively, sorted
    async fn list_files(&self, dir: &str) -> Result<Vec<String>>;
}

/// Probe backed by the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFileProbe {
    passwd: PathBuf,
    group: PathBuf,
}

impl Default for LocalFileProbe {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            group: PathBuf::from("/etc/group"),
        }
    }
}

impl LocalFileProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve owner and group names from alternative account databases
    pub fn with_account_files(passwd: impl Into<PathBuf>, group: impl Into<PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
        }
    }

    async fn username(&self, uid: u32) -> String {
        lookup_name(&self.passwd, uid).await
    }

    async fn groupname(&self, gid: u32) -> String {
        lookup_name(&self.group, gid).await
    }
}

/// Name for a numeric id in a colon-separated account file (name:x:id:...).
/// Falls back to the number itself.
async fn lookup_name(db: &Path, id: u32) -> String {
    tokio::fs::read_to_string(db)
        .await
        .ok()
        .and_then(|content| {
            content.lines().find_map(|line| {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() >= 3 && parts[2].parse::<u32>().ok() == Some(id) {
                    Some(parts[0].to_string())
                } else {
                    None
                }
            })
        })
        .unwrap_or_else(|| id.to_string())
}

fn io_error(path: &str, e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound {
            path: path.to_string(),
        },
        _ => Error::Io(e),
    }
}

#[async_trait]
impl FileProbe for LocalFileProbe {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path, "Path does not exist");
                return Ok(FileStat::missing(path));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let file_type = metadata.file_type();
        let kind = if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        };

        #[cfg(unix)]
        let (owner, group, mode) = {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};
            (
                self.username(metadata.uid()).await,
                self.groupname(metadata.gid()).await,
                metadata.permissions().mode() & 0o7777,
            )
        };

        #[cfg(not(unix))]
        let (owner, group, mode) = (String::new(), String::new(), 0);

        Ok(FileStat {
            path: path.to_string(),
            exists: true,
            kind,
            owner,
            group,
            mode,
        })
    }

    async fn read(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![PathBuf::from(dir)];

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| io_error(&current.display().to_string(), e))?;

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path().display().to_string());
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stat_missing_path() {
        let probe = LocalFileProbe::new();
        let stat = probe.stat("/nonexistent/pgstig/postgresql.conf").await.unwrap();
        assert!(!stat.exists);
        assert_eq!(stat.kind, FileKind::Missing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stat_mode_and_names() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("postgresql.conf");
        std::fs::write(&conf, "log_connections = on\n").unwrap();
        std::fs::set_permissions(&conf, std::fs::Permissions::from_mode(0o600)).unwrap();

        let meta = std::fs::metadata(&conf).unwrap();
        let passwd = dir.path().join("passwd");
        let group = dir.path().join("group");
        std::fs::write(
            &passwd,
            format!("postgres:x:{}:{}::/var/lib/pgsql:/bin/bash\n", meta.uid(), meta.gid()),
        )
        .unwrap();
        std::fs::write(&group, format!("postgres:x:{}:\n", meta.gid())).unwrap();

        let probe = LocalFileProbe::with_account_files(&passwd, &group);
        let stat = probe.stat(conf.to_str().unwrap()).await.unwrap();
        assert!(stat.is_file());
        assert_eq!(stat.owner, "postgres");
        assert_eq!(stat.group, "postgres");
        assert_eq!(stat.mode_octal(), "0600");
    }

    #[tokio::test]
    async fn test_list_files_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("log")).unwrap();
        std::fs::write(dir.path().join("pg_hba.conf"), "").unwrap();
        std::fs::write(dir.path().join("log").join("postgresql-Mon.log"), "").unwrap();

        let probe = LocalFileProbe::new();
        let files = probe.list_files(dir.path().to_str().unwrap()).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.ends_with("postgresql-Mon.log")));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let probe = LocalFileProbe::new();
        let err = probe.read("/nonexistent/pg_hba.conf").await.unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_number() {
        let name = lookup_name(Path::new("/nonexistent/passwd"), 26).await;
        assert_eq!(name, "26");
    }
}
