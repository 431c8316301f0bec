use std::fmt;

/// Permission level stored on a rights or share row.
///
/// The numeric values are persisted, so they must not change:
/// deny = 0, read = 2, read-write = 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Permission {
    Deny,
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown permission value: {0}")]
pub struct PermissionError(pub i64);

impl Permission {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Permission::Deny => 0,
            Permission::Read => 2,
            Permission::ReadWrite => 3,
        }
    }
}

impl TryFrom<i64> for Permission {
    type Error = PermissionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Permission::Deny),
            2 => Ok(Permission::Read),
            3 => Ok(Permission::ReadWrite),
            other => Err(PermissionError(other)),
        }
    }
}

impl From<Permission> for i64 {
    fn from(value: Permission) -> Self {
        value.as_i64()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Permission::Deny => "deny",
            Permission::Read => "read",
            Permission::ReadWrite => "read-write",
        };
        f.write_str(s)
    }
}
