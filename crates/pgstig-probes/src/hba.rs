//! pg_hba.conf parsing
//!
//! Records keep file order, since PostgreSQL uses the first matching record.
//! Supported syntax: `#` comments, blank lines, double-quoted tokens, `local`
//! records (no address column), `address mask` pairs and trailing auth options.

use crate::file::FileProbe;
use async_trait::async_trait;
use pgstig_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

const CONNECTION_TYPES: &[&str] = &[
    "local",
    "host",
    "hostssl",
    "hostnossl",
    "hostgssenc",
    "hostnogssenc",
];

/// One access record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HbaRecord {
    /// Line number in the file (1-based)
    pub line: usize,
    pub kind: String,
    pub database: String,
    pub user: String,
    /// Empty for `local` records
    pub address: String,
    pub auth_method: String,
    /// Auth options (`key=value`), space separated
    pub auth_params: String,
}

/// Column of an access record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbaColumn {
    Type,
    Database,
    User,
    Address,
    AuthMethod,
    AuthParams,
}

impl HbaRecord {
    pub fn get(&self, column: HbaColumn) -> &str {
        match column {
            HbaColumn::Type => &self.kind,
            HbaColumn::Database => &self.database,
            HbaColumn::User => &self.user,
            HbaColumn::Address => &self.address,
            HbaColumn::AuthMethod => &self.auth_method,
            HbaColumn::AuthParams => &self.auth_params,
        }
    }
}

/// Parsed pg_hba.conf
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HbaFile {
    pub records: Vec<HbaRecord>,
}

impl HbaFile {
    /// Parse pg_hba.conf content
    pub fn parse(content: &str) -> Result<Self> {
        let mut records = Vec::new();

        for (line, raw) in logical_lines(content) {
            let tokens = tokenize(&raw);
            if tokens.is_empty() {
                continue;
            }

            let kind = tokens[0].as_str();
            if kind.starts_with("include") {
                warn!(line, directive = kind, "Skipping pg_hba.conf include directive");
                continue;
            }
            if !CONNECTION_TYPES.contains(&kind) {
                return Err(Error::Parse(format!(
                    "pg_hba.conf line {}: unknown connection type {:?}",
                    line, kind
                )));
            }

            let record = if kind == "local" {
                if tokens.len() < 4 {
                    return Err(short_record(line));
                }
                HbaRecord {
                    line,
                    kind: kind.to_string(),
                    database: tokens[1].clone(),
                    user: tokens[2].clone(),
                    address: String::new(),
                    auth_method: tokens[3].clone(),
                    auth_params: tokens[4..].join(" "),
                }
            } else {
                if tokens.len() < 5 {
                    return Err(short_record(line));
                }
                let (address, method_at) = if is_mask_pair(&tokens[3], &tokens[4]) {
                    (format!("{} {}", tokens[3], tokens[4]), 5)
                } else {
                    (tokens[3].clone(), 4)
                };
                let auth_method = tokens
                    .get(method_at)
                    .cloned()
                    .ok_or_else(|| short_record(line))?;
                HbaRecord {
                    line,
                    kind: kind.to_string(),
                    database: tokens[1].clone(),
                    user: tokens[2].clone(),
                    address,
                    auth_method,
                    auth_params: tokens[method_at + 1..].join(" "),
                }
            };

            records.push(record);
        }

        debug!("Parsed {} pg_hba.conf records", records.len());
        Ok(Self { records })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HbaRecord> {
        self.records.iter()
    }

    /// Records matching a predicate, in file order
    pub fn filter<F>(&self, predicate: F) -> HbaFile
    where
        F: Fn(&HbaRecord) -> bool,
    {
        HbaFile {
            records: self.records.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// One column of every record, in file order
    pub fn column(&self, column: HbaColumn) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.get(column).to_string())
            .collect()
    }

    /// Distinct values of a column, in order of first appearance
    pub fn distinct(&self, column: HbaColumn) -> Vec<String> {
        let mut seen = Vec::new();
        for value in self.column(column) {
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
        seen
    }
}

fn short_record(line: usize) -> Error {
    Error::Parse(format!("pg_hba.conf line {}: too few fields", line))
}

/// `192.168.0.0 255.255.0.0` style address
fn is_mask_pair(address: &str, next: &str) -> bool {
    !address.contains('/') && address.parse::<IpAddr>().is_ok() && next.parse::<IpAddr>().is_ok()
}

/// Join lines ending in `\` with the line after; each record keeps the number of
/// its first physical line
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in content.lines().enumerate() {
        let (line, mut text) = pending.take().unwrap_or((index + 1, String::new()));
        let trimmed = raw.trim_end();
        match trimmed.strip_suffix('\\') {
            Some(head) => {
                text.push_str(head);
                text.push(' ');
                pending = Some((line, text));
            }
            None => {
                text.push_str(raw);
                lines.push((line, text));
            }
        }
    }

    // A continuation on the last line has nothing to join
    lines.extend(pending);
    lines
}

/// Split a line into whitespace separated tokens. Quotes group whitespace and `#`;
/// an unquoted `#` starts a comment. Quotes are stripped from the token.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '#' if !quoted => break,
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    tokens
}

/// Reads pg_hba.conf from the target host
#[async_trait]
pub trait HostAccessConfigProbe: Send + Sync {
    async fn parse(&self, path: &str) -> Result<HbaFile>;
}

/// pg_hba.conf probe reading through a [`FileProbe`]
pub struct FileHbaProbe {
    files: Arc<dyn FileProbe>,
}

impl FileHbaProbe {
    pub fn new(files: Arc<dyn FileProbe>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl HostAccessConfigProbe for FileHbaProbe {
    async fn parse(&self, path: &str) -> Result<HbaFile> {
        let content = self.files.read(path).await?;
        HbaFile::parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# TYPE  DATABASE        USER            ADDRESS                 METHOD

# "local" is for Unix domain socket connections only
local   all             postgres                                peer
local   all             all                                     md5
host    all             all             127.0.0.1/32            scram-sha-256
hostssl "my db"         alice           10.0.0.0 255.0.0.0      cert clientcert=verify-full
host    replication     all             ::1/128                 trust   # temporary
"#;

    #[test]
    fn test_parse_records() {
        let hba = HbaFile::parse(SAMPLE).unwrap();
        assert_eq!(hba.len(), 5);

        let local = &hba.records[0];
        assert_eq!(local.kind, "local");
        assert_eq!(local.address, "");
        assert_eq!(local.auth_method, "peer");
        assert_eq!(local.line, 5);

        let ssl = &hba.records[3];
        assert_eq!(ssl.database, "my db");
        assert_eq!(ssl.address, "10.0.0.0 255.0.0.0");
        assert_eq!(ssl.auth_method, "cert");
        assert_eq!(ssl.auth_params, "clientcert=verify-full");

        assert_eq!(hba.records[4].auth_method, "trust");
        assert_eq!(hba.records[4].auth_params, "");
    }

    #[test]
    fn test_distinct_and_filter() {
        let hba = HbaFile::parse(SAMPLE).unwrap();
        assert_eq!(
            hba.distinct(HbaColumn::AuthMethod),
            vec!["peer", "md5", "scram-sha-256", "cert", "trust"]
        );
        assert_eq!(hba.distinct(HbaColumn::Database), vec!["all", "my db", "replication"]);

        let hostssl = hba.filter(|r| r.kind == "hostssl");
        assert_eq!(hostssl.column(HbaColumn::User), vec!["alice"]);
        assert!(hba.filter(|r| r.kind == "hostgssenc").is_empty());
    }

    #[test]
    fn test_empty_file() {
        let hba = HbaFile::parse("# nothing here\n\n").unwrap();
        assert!(hba.is_empty());
        assert!(hba.distinct(HbaColumn::AuthMethod).is_empty());
    }

    #[test]
    fn test_malformed_records() {
        let err = HbaFile::parse("host all all md5\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));

        let err = HbaFile::parse("hostx all all 0.0.0.0/0 md5\n").unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_include_directives_skipped() {
        let hba = HbaFile::parse("include_if_exists extra.conf\nlocal all all peer\n").unwrap();
        assert_eq!(hba.len(), 1);
    }

    #[test]
    fn test_line_continuation() {
        let content = "# comment\nhost all all 0.0.0.0/0 \\\n    trust\nlocal \\\n all \\\n all peer\n";
        let hba = HbaFile::parse(content).unwrap();
        assert_eq!(hba.len(), 2);

        let host = &hba.records[0];
        assert_eq!(host.line, 2);
        assert_eq!(host.address, "0.0.0.0/0");
        assert_eq!(host.auth_method, "trust");

        assert_eq!(hba.records[1].line, 4);
        assert_eq!(hba.records[1].auth_method, "peer");
    }

    #[test]
    fn test_dangling_continuation() {
        let hba = HbaFile::parse("local all all peer \\").unwrap();
        assert_eq!(hba.len(), 1);
        assert_eq!(hba.records[0].auth_method, "peer");
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(tokenize(r#"host "a#b" all"#), vec!["host", "a#b", "all"]);
        assert_eq!(tokenize("   # only comment"), Vec::<String>::new());
    }
}
