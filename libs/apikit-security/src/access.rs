use crate::Permission;

/// Access level a query requires from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    Read,
    ReadWrite,
}

impl AccessLevel {
    /// `editable` requests ask for write access, everything else reads.
    #[must_use]
    pub const fn from_editable(editable: bool) -> Self {
        if editable {
            AccessLevel::ReadWrite
        } else {
            AccessLevel::Read
        }
    }

    /// Minimal stored permission that satisfies this access level.
    #[must_use]
    pub const fn required_permission(self) -> Permission {
        match self {
            AccessLevel::Read => Permission::Read,
            AccessLevel::ReadWrite => Permission::ReadWrite,
        }
    }

    #[must_use]
    pub fn is_granted_by(self, granted: Permission) -> bool {
        granted != Permission::Deny && granted >= self.required_permission()
    }
}
