//! WorkerIdentity - ワーカーの識別子
//!
//! claim の所有者表示と Supervisor からのアドレス指定の両方に使います。
//! 表示形式は `{pool}-{ordinal:02}`（例: `classifier-00`）、
//! グループ付きの完全名は `{pool}:{pool}-{ordinal:02}` です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerIdentity {
    pool: String,
    ordinal: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid worker identity '{0}', expected <pool>-<ordinal>")]
pub struct ParseIdentityError(pub String);

impl WorkerIdentity {
    pub fn new(pool: impl Into<String>, ordinal: u32) -> Self {
        Self {
            pool: pool.into(),
            ordinal,
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Group-qualified name, `classifier:classifier-00`.
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.pool, self)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.pool, self.ordinal)
    }
}

impl FromStr for WorkerIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdentityError(s.to_string());
        let (pool, ordinal) = s.rsplit_once('-').ok_or_else(err)?;
        if pool.is_empty() || ordinal.is_empty() || !ordinal.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let ordinal = ordinal.parse().map_err(|_| err())?;
        Ok(Self::new(pool, ordinal))
    }
}

impl TryFrom<String> for WorkerIdentity {
    type Error = ParseIdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkerIdentity> for String {
    fn from(value: WorkerIdentity) -> Self {
        value.to_string()
    }
}
