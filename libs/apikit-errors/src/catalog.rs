//! Static error catalog for API calls.

use crate::problem::Problem;
use http::StatusCode;

/// Numeric error code reported with every failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ErrorCode {
    /// Malformed, unknown or missing call parameters.
    Parameters,
    /// Storage or other server-side failure.
    Internal,
    /// The caller may not see or change the referenced object.
    Permissions,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            ErrorCode::Parameters => 100,
            ErrorCode::Internal => 111,
            ErrorCode::Permissions => 120,
        }
    }

    #[must_use]
    pub const fn def(self) -> &'static ErrDef {
        match self {
            ErrorCode::Parameters => &PARAMETERS,
            ErrorCode::Internal => &INTERNAL,
            ErrorCode::Permissions => &PERMISSIONS,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        value.as_u16()
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(ErrorCode::Parameters),
            111 => Ok(ErrorCode::Internal),
            120 => Ok(ErrorCode::Permissions),
            other => Err(format!("unknown API error code: {other}")),
        }
    }
}

/// Static error definition from the catalog
#[derive(Debug, Clone, Copy)]
pub struct ErrDef {
    pub status: u16,
    pub title: &'static str,
    pub code: &'static str,
    pub type_url: &'static str,
}

pub const PARAMETERS: ErrDef = ErrDef {
    status: 400,
    title: "Invalid params",
    code: "API_ERROR_PARAMETERS",
    type_url: "about:blank",
};

pub const INTERNAL: ErrDef = ErrDef {
    status: 500,
    title: "Internal error",
    code: "API_ERROR_INTERNAL",
    type_url: "about:blank",
};

pub const PERMISSIONS: ErrDef = ErrDef {
    status: 403,
    title: "No permissions",
    code: "API_ERROR_PERMISSIONS",
    type_url: "about:blank",
};

impl ErrDef {
    /// Convert this error definition into a Problem with the given detail
    #[inline]
    pub fn as_problem(&self, detail: impl Into<String>) -> Problem {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Problem::new(status, self.title, detail.into())
            .with_code(self.code)
            .with_type(self.type_url)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Parameters.as_u16(), 100);
        assert_eq!(ErrorCode::Internal.as_u16(), 111);
        assert_eq!(ErrorCode::Permissions.as_u16(), 120);
        assert_eq!(ErrorCode::try_from(120), Ok(ErrorCode::Permissions));
        assert!(ErrorCode::try_from(200).is_err());
    }

    #[test]
    fn permissions_def_to_problem() {
        let problem = ErrorCode::Permissions
            .def()
            .as_problem("No permissions to referred object or it does not exist!");

        assert_eq!(problem.status, StatusCode::FORBIDDEN);
        assert_eq!(problem.title, "No permissions");
        assert_eq!(problem.code, "API_ERROR_PERMISSIONS");
    }

    #[test]
    fn error_code_serializes_as_number() {
        let json = serde_json::to_string(&ErrorCode::Parameters).unwrap();
        assert_eq!(json, "100");
    }
}
