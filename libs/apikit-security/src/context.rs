use crate::Id;

/// Privilege class of a caller.
///
/// Ordered from least to most privileged so policies can express
/// "admins and above" with a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum UserType {
    User,
    Admin,
    SuperAdmin,
}

impl UserType {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            UserType::User => 1,
            UserType::Admin => 2,
            UserType::SuperAdmin => 3,
        }
    }
}

impl TryFrom<i64> for UserType {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(UserType::User),
            2 => Ok(UserType::Admin),
            3 => Ok(UserType::SuperAdmin),
            other => Err(format!("unknown user type: {other}")),
        }
    }
}

impl From<UserType> for i64 {
    fn from(value: UserType) -> Self {
        value.as_i64()
    }
}

/// `CallerContext` carries the identity of the caller for one API request.
///
/// It is built once per request and passed by reference into every engine call.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CallerContext {
    user_id: Id,
    user_type: UserType,
    user_group_ids: Vec<Id>,
}

impl CallerContext {
    #[must_use]
    pub fn builder() -> CallerContextBuilder {
        CallerContextBuilder::default()
    }

    /// Super admin caller with no group memberships.
    #[must_use]
    pub fn super_admin(user_id: Id) -> Self {
        Self::builder()
            .user_id(user_id)
            .user_type(UserType::SuperAdmin)
            .build()
    }

    #[must_use]
    pub fn user_id(&self) -> Id {
        self.user_id
    }

    #[must_use]
    pub fn user_type(&self) -> UserType {
        self.user_type
    }

    /// User groups the caller belongs to, sorted and deduplicated.
    #[must_use]
    pub fn user_group_ids(&self) -> &[Id] {
        &self.user_group_ids
    }

    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        self.user_type == UserType::SuperAdmin
    }

    #[must_use]
    pub fn is_at_least(&self, user_type: UserType) -> bool {
        self.user_type >= user_type
    }

    #[must_use]
    pub fn is_member_of(&self, user_group_id: Id) -> bool {
        self.user_group_ids.binary_search(&user_group_id).is_ok()
    }
}

#[derive(Debug)]
pub struct CallerContextBuilder {
    user_id: Id,
    user_type: UserType,
    user_group_ids: Vec<Id>,
}

impl Default for CallerContextBuilder {
    fn default() -> Self {
        Self {
            user_id: 0,
            user_type: UserType::User,
            user_group_ids: Vec::new(),
        }
    }
}

impl CallerContextBuilder {
    #[must_use]
    pub fn user_id(mut self, user_id: Id) -> Self {
        self.user_id = user_id;
        self
    }

    #[must_use]
    pub fn user_type(mut self, user_type: UserType) -> Self {
        self.user_type = user_type;
        self
    }

    #[must_use]
    pub fn add_user_group(mut self, user_group_id: Id) -> Self {
        self.user_group_ids.push(user_group_id);
        self
    }

    #[must_use]
    pub fn user_groups(mut self, user_group_ids: impl IntoIterator<Item = Id>) -> Self {
        self.user_group_ids.extend(user_group_ids);
        self
    }

    #[must_use]
    pub fn build(mut self) -> CallerContext {
        self.user_group_ids.sort_unstable();
        self.user_group_ids.dedup();
        CallerContext {
            user_id: self.user_id,
            user_type: self.user_type,
            user_group_ids: self.user_group_ids,
        }
    }
}
