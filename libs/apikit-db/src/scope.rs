//! Permission scoping of read queries.
//!
//! Two distinct capability models are supported:
//!
//! - **Group ACL**: the object belongs to host-group-like groups and the caller's
//!   user groups hold `rights` on those groups. The object is visible when, over all
//!   matching rights, none is deny and the highest reaches the required level.
//! - **Owner + share**: the object has an owner and explicit per-user and
//!   per-user-group share tables. Public objects are readable by everyone.
//!
//! The predicate is computed before execution and conjoined with `WHERE`;
//! rows are never post-filtered.

use apikit_security::{AccessLevel, CallerContext, UserType};

use crate::value::{Fragment, SqlValue};

/// Outcome of applying a policy to one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// No restriction.
    Unrestricted,
    /// The call cannot return anything; skip the query.
    Empty,
    Restricted(Fragment),
}

/// How an object reaches the groups that `rights` refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAclPath {
    /// The object is itself a group; `column` of the outer row holds its id.
    Direct { column: String },
    /// The object is linked to groups through `table(<object_col>, groupid)`,
    /// correlated on `outer_col` of the outer row.
    Linked {
        table: String,
        object_col: String,
        outer_col: String,
        nullable: bool,
    },
}

impl GroupAclPath {
    #[must_use]
    pub fn direct(column: &str) -> Self {
        GroupAclPath::Direct {
            column: column.to_owned(),
        }
    }

    #[must_use]
    pub fn linked(table: &str, object_col: &str, outer_col: &str) -> Self {
        GroupAclPath::Linked {
            table: table.to_owned(),
            object_col: object_col.to_owned(),
            outer_col: outer_col.to_owned(),
            nullable: false,
        }
    }

    /// Rows whose outer column is `NULL` pass unconditionally.
    #[must_use]
    pub fn nullable(self) -> Self {
        match self {
            GroupAclPath::Linked {
                table,
                object_col,
                outer_col,
                ..
            } => GroupAclPath::Linked {
                table,
                object_col,
                outer_col,
                nullable: true,
            },
            direct @ GroupAclPath::Direct { .. } => direct,
        }
    }

    fn predicate(&self, n: usize, alias: &str, groups: &[i64], required: i64) -> Fragment {
        let r = format!("acl_r{n}");
        let having =
            format!("HAVING MIN({r}.permission)>0 AND MAX({r}.permission)>=?");
        let mut params: Vec<SqlValue> = groups.iter().copied().map(SqlValue::Int).collect();
        params.push(SqlValue::Int(required));
        let in_groups = crate::value::placeholders(groups.len());

        match self {
            GroupAclPath::Direct { column } => Fragment::new(
                format!(
                    "EXISTS (SELECT NULL FROM rights {r} \
                     WHERE {alias}.{column}={r}.id AND {r}.groupid IN ({in_groups}) \
                     GROUP BY {r}.id {having})"
                ),
                params,
            ),
            GroupAclPath::Linked {
                table,
                object_col,
                outer_col,
                nullable,
            } => {
                let l = format!("acl_l{n}");
                let exists = format!(
                    "EXISTS (SELECT NULL FROM {table} {l} \
                     JOIN rights {r} ON {r}.id={l}.groupid AND {r}.groupid IN ({in_groups}) \
                     WHERE {alias}.{outer_col}={l}.{object_col} \
                     GROUP BY {l}.{object_col} {having})"
                );
                if *nullable {
                    Fragment::new(format!("({alias}.{outer_col} IS NULL OR {exists})"), params)
                } else {
                    Fragment::new(exists, params)
                }
            }
        }
    }
}

/// A share table `table(<object_col>, <subject_col>, permission)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTable {
    pub table: String,
    pub object_col: String,
    pub subject_col: String,
}

impl ShareTable {
    #[must_use]
    pub fn new(table: &str, object_col: &str, subject_col: &str) -> Self {
        Self {
            table: table.to_owned(),
            object_col: object_col.to_owned(),
            subject_col: subject_col.to_owned(),
        }
    }
}

/// Owner + explicit share model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareAcl {
    pub users: ShareTable,
    pub user_groups: ShareTable,
    pub owner_col: String,
    /// Column that is `0` for public objects.
    pub private_col: Option<String>,
}

impl ShareAcl {
    fn predicate(&self, alias: &str, pk: &str, caller: &CallerContext, required: i64) -> Fragment {
        let ShareTable {
            table: ut,
            object_col: uo,
            subject_col: us,
        } = &self.users;
        let mut parts = vec![Fragment::new(
            format!(
                "EXISTS (SELECT NULL FROM {ut} acl_su \
                 WHERE acl_su.{uo}={alias}.{pk} AND acl_su.{us}=? AND acl_su.permission>=?)"
            ),
            vec![SqlValue::Int(caller.user_id()), SqlValue::Int(required)],
        )];

        let groups = caller.user_group_ids();
        if !groups.is_empty() {
            let ShareTable {
                table: gt,
                object_col: go,
                subject_col: gs,
            } = &self.user_groups;
            let mut params: Vec<SqlValue> = groups.iter().copied().map(SqlValue::Int).collect();
            params.push(SqlValue::Int(required));
            parts.push(Fragment::new(
                format!(
                    "EXISTS (SELECT NULL FROM {gt} acl_sg \
                     WHERE acl_sg.{go}={alias}.{pk} AND acl_sg.{gs} IN ({}) AND acl_sg.permission>=?)",
                    crate::value::placeholders(groups.len())
                ),
                params,
            ));
        }

        parts.push(Fragment::new(
            format!("{alias}.{}=?", self.owner_col),
            vec![SqlValue::Int(caller.user_id())],
        ));

        if let Some(private) = &self.private_col
            && required == AccessLevel::Read.required_permission().as_i64()
        {
            parts.push(Fragment::raw(format!("{alias}.{private}=0")));
        }

        Fragment::any(parts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclRule {
    /// Every caller sees every row.
    Public,
    /// Group ACL; several paths are OR-ed.
    Groups(Vec<GroupAclPath>),
    Shared(ShareAcl),
}

/// Per-entity read access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclPolicy {
    pub rule: AclRule,
    /// Callers of this type or above are not restricted.
    pub bypass: UserType,
    /// `editable` reads by callers below this type return nothing.
    pub editable_min_type: Option<UserType>,
}

impl Default for AclPolicy {
    fn default() -> Self {
        Self::public()
    }
}

impl AclPolicy {
    #[must_use]
    pub fn public() -> Self {
        Self {
            rule: AclRule::Public,
            bypass: UserType::SuperAdmin,
            editable_min_type: None,
        }
    }

    #[must_use]
    pub fn groups(paths: Vec<GroupAclPath>) -> Self {
        Self {
            rule: AclRule::Groups(paths),
            ..Self::public()
        }
    }

    #[must_use]
    pub fn shared(acl: ShareAcl) -> Self {
        Self {
            rule: AclRule::Shared(acl),
            ..Self::public()
        }
    }

    #[must_use]
    pub fn bypass_from(mut self, user_type: UserType) -> Self {
        self.bypass = user_type;
        self
    }

    #[must_use]
    pub fn editable_requires(mut self, user_type: UserType) -> Self {
        self.editable_min_type = Some(user_type);
        self
    }

    /// Compute the scope of one read call.
    #[must_use]
    pub fn scope(
        &self,
        caller: &CallerContext,
        alias: &str,
        pk: &str,
        level: AccessLevel,
        nopermissions: bool,
    ) -> Scope {
        if level == AccessLevel::ReadWrite
            && self
                .editable_min_type
                .is_some_and(|min| !caller.is_at_least(min))
        {
            return Scope::Empty;
        }
        if nopermissions || caller.is_at_least(self.bypass) {
            return Scope::Unrestricted;
        }

        let required = level.required_permission().as_i64();
        match &self.rule {
            AclRule::Public => Scope::Unrestricted,
            AclRule::Groups(paths) => {
                let groups = caller.user_group_ids();
                if groups.is_empty() || paths.is_empty() {
                    return Scope::Restricted(Fragment::deny());
                }
                let parts = paths
                    .iter()
                    .enumerate()
                    .map(|(n, path)| path.predicate(n, alias, groups, required))
                    .collect();
                Scope::Restricted(Fragment::any(parts))
            }
            AclRule::Shared(acl) => Scope::Restricted(acl.predicate(alias, pk, caller, required)),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn user(groups: &[i64]) -> CallerContext {
        CallerContext::builder()
            .user_id(5)
            .user_type(UserType::User)
            .user_groups(groups.iter().copied())
            .build()
    }

    fn restricted(scope: Scope) -> Fragment {
        match scope {
            Scope::Restricted(f) => f,
            other => panic!("expected restricted scope, got {other:?}"),
        }
    }

    #[test]
    fn super_admin_and_nopermissions_bypass() {
        let policy = AclPolicy::groups(vec![GroupAclPath::direct("groupid")]);
        let admin = CallerContext::super_admin(1);
        assert_eq!(
            policy.scope(&admin, "g", "groupid", AccessLevel::ReadWrite, false),
            Scope::Unrestricted
        );
        assert_eq!(
            policy.scope(&user(&[7]), "g", "groupid", AccessLevel::Read, true),
            Scope::Unrestricted
        );
    }

    #[test]
    fn caller_without_groups_is_denied() {
        let policy = AclPolicy::groups(vec![GroupAclPath::direct("groupid")]);
        let f = restricted(policy.scope(&user(&[]), "g", "groupid", AccessLevel::Read, false));
        assert_eq!(f.sql(), "1=0");
    }

    #[test]
    fn direct_group_predicate() {
        let policy = AclPolicy::groups(vec![GroupAclPath::direct("groupid")]);
        let f = restricted(policy.scope(&user(&[7, 9]), "g", "groupid", AccessLevel::ReadWrite, false));
        assert_eq!(
            f.sql(),
            "EXISTS (SELECT NULL FROM rights acl_r0 WHERE g.groupid=acl_r0.id \
             AND acl_r0.groupid IN (?,?) GROUP BY acl_r0.id \
             HAVING MIN(acl_r0.permission)>0 AND MAX(acl_r0.permission)>=?)"
        );
        assert_eq!(f.params(), &[SqlValue::Int(7), SqlValue::Int(9), SqlValue::Int(3)]);
    }

    #[test]
    fn linked_paths_are_ored_and_nullable_is_honored() {
        let policy = AclPolicy::groups(vec![
            GroupAclPath::linked("hosts_groups", "hostid", "hostid"),
            GroupAclPath::linked("hosts_groups", "hostid", "proxy_hostid").nullable(),
        ]);
        let f = restricted(policy.scope(&user(&[7]), "h", "hostid", AccessLevel::Read, false));
        assert!(f.sql().starts_with("(EXISTS (SELECT NULL FROM hosts_groups acl_l0 JOIN rights acl_r0"));
        assert!(f.sql().contains(" OR (h.proxy_hostid IS NULL OR EXISTS (SELECT NULL FROM hosts_groups acl_l1"));
        assert!(f.sql().contains("WHERE h.hostid=acl_l0.hostid GROUP BY acl_l0.hostid"));
        assert_eq!(
            f.params(),
            &[SqlValue::Int(7), SqlValue::Int(2), SqlValue::Int(7), SqlValue::Int(2)]
        );
    }

    #[test]
    fn editable_restriction_empties_for_lower_types() {
        let policy = AclPolicy::groups(vec![GroupAclPath::linked("x", "y", "z").nullable()])
            .editable_requires(UserType::SuperAdmin);
        assert_eq!(
            policy.scope(&user(&[1]), "s", "scriptid", AccessLevel::ReadWrite, false),
            Scope::Empty
        );
        assert!(matches!(
            policy.scope(&user(&[1]), "s", "scriptid", AccessLevel::Read, false),
            Scope::Restricted(_)
        ));
    }

    #[test]
    fn share_predicate_includes_public_only_for_reads() {
        let policy = AclPolicy::shared(ShareAcl {
            users: ShareTable::new("sysmap_user", "sysmapid", "userid"),
            user_groups: ShareTable::new("sysmap_usrgrp", "sysmapid", "usrgrpid"),
            owner_col: "userid".to_owned(),
            private_col: Some("private".to_owned()),
        })
        .bypass_from(UserType::Admin);

        let read = restricted(policy.scope(&user(&[3]), "s", "sysmapid", AccessLevel::Read, false));
        assert!(read.sql().ends_with(" OR s.userid=? OR s.private=0)"));
        assert_eq!(read.params().len(), 5);

        let write = restricted(policy.scope(&user(&[]), "s", "sysmapid", AccessLevel::ReadWrite, false));
        assert!(!write.sql().contains("acl_sg"));
        assert!(!write.sql().contains("private"));

        let admin = CallerContext::builder().user_id(2).user_type(UserType::Admin).build();
        assert_eq!(
            policy.scope(&admin, "s", "sysmapid", AccessLevel::Read, false),
            Scope::Unrestricted
        );
    }
}
