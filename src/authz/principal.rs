use std::collections::HashSet;

use uuid::Uuid;

use super::{is_protected, permissions as perms};

/// The resolved authorization state of an authenticated user: the union of
/// permissions across every held role, with the global/group-scoped
/// distinction preserved, plus the set of groups the user administers or
/// belongs to.
///
/// A user with no resolvable roles gets the empty principal: no permissions,
/// no groups. Every gate below fails closed on it.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub roles: HashSet<String>,
    /// Permissions held via global role assignments.
    pub permissions: HashSet<String>,
    /// Permissions held via group-scoped assignments: (name, group_id).
    pub scoped_permissions: HashSet<(String, Uuid)>,
    /// Groups from group-scoped assignments - the administered/member set.
    pub groups: HashSet<Uuid>,
}

/// Visibility predicate for collection reads, from the first-match decision
/// table: all rows, rows in the given groups, or only the caller's own rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadScope {
    All,
    Groups(HashSet<Uuid>),
    Own(Uuid),
}

impl ReadScope {
    /// Whether a row with the given group/owner is visible under this scope.
    /// Used for single-row gets so list and detail visibility agree.
    pub fn permits(&self, row_group: Option<Uuid>, row_owner: Uuid) -> bool {
        match self {
            ReadScope::All => true,
            ReadScope::Groups(groups) => row_group.map(|g| groups.contains(&g)).unwrap_or(false),
            ReadScope::Own(user_id) => row_owner == *user_id,
        }
    }
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            roles: HashSet::new(),
            permissions: HashSet::new(),
            scoped_permissions: HashSet::new(),
            groups: HashSet::new(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = String>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = String>) -> Self {
        self.permissions = perms.into_iter().collect();
        self
    }

    pub fn with_scoped_permissions(
        mut self,
        scoped: impl IntoIterator<Item = (String, Uuid)>,
    ) -> Self {
        let scoped: HashSet<(String, Uuid)> = scoped.into_iter().collect();
        self.groups.extend(scoped.iter().map(|(_, g)| *g));
        self.scoped_permissions = scoped;
        self
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = Uuid>) -> Self {
        self.groups.extend(groups);
        self
    }

    /// Permission held through any assignment, global or scoped.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
            || self.scoped_permissions.iter().any(|(name, _)| name == permission)
    }

    fn has_any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.has_permission(n))
    }

    /// Fail-closed check: true when the user resolved to nothing at all.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.scoped_permissions.is_empty()
    }

    // -------------------------------------------------------------------------
    // Request / budget visibility and mutation
    // -------------------------------------------------------------------------

    /// First match wins: all-tier viewers see everything, club-tier viewers
    /// see their administered groups' rows, everyone else sees their own.
    pub fn read_scope(&self) -> ReadScope {
        if self.has_any(&[perms::VIEW_ALL_REQUESTS, perms::MANAGE_ALL_REQUESTS]) {
            ReadScope::All
        } else if self.has_any(&[perms::VIEW_CLUB_REQUESTS, perms::MANAGE_CLUB_REQUESTS]) {
            ReadScope::Groups(self.groups.clone())
        } else {
            ReadScope::Own(self.user_id)
        }
    }

    /// Status mutation gate. Club-tier managers may only touch rows assigned
    /// to one of their administered groups; rows without a group are reserved
    /// for all-tier managers.
    pub fn can_manage_request(&self, row_group: Option<Uuid>) -> bool {
        if self.has_permission(perms::MANAGE_ALL_REQUESTS) {
            return true;
        }
        if self.has_permission(perms::MANAGE_CLUB_REQUESTS) {
            return row_group.map(|g| self.groups.contains(&g)).unwrap_or(false);
        }
        false
    }

    pub fn can_create_requests(&self) -> bool {
        self.has_permission(perms::CREATE_REQUESTS)
    }

    // -------------------------------------------------------------------------
    // Role / group / user administration
    // -------------------------------------------------------------------------

    pub fn can_manage_all_roles(&self) -> bool {
        self.has_permission(perms::MANAGE_ALL_ROLES)
    }

    pub fn can_manage_roles(&self) -> bool {
        self.has_any(&[perms::MANAGE_ALL_ROLES, perms::MANAGE_CLUB_ROLES])
    }

    pub fn can_manage_all_users(&self) -> bool {
        self.has_permission(perms::MANAGE_ALL_USERS)
    }

    pub fn can_manage_users(&self) -> bool {
        self.has_any(&[perms::MANAGE_ALL_USERS, perms::MANAGE_CLUB_USERS])
    }

    /// Group administration: org-wide managers always; club managers only
    /// within their own groups.
    pub fn can_manage_group(&self, group_id: Uuid) -> bool {
        if self.has_permission(perms::MANAGE_ALL_USERS) {
            return true;
        }
        self.has_permission(perms::MANAGE_CLUB_USERS) && self.groups.contains(&group_id)
    }

    /// Escalation gate for attaching a permission to a role. Holders of
    /// `manage_all_roles` may grant anything in the catalog; club-level role
    /// managers may grant only what they themselves hold, excluding the
    /// protected tier.
    pub fn can_grant_permission(&self, permission: &str) -> bool {
        if self.can_manage_all_roles() {
            return true;
        }
        if !self.has_permission(perms::MANAGE_CLUB_ROLES) {
            return false;
        }
        !is_protected(permission) && self.has_permission(permission)
    }

    /// Scoping gate: a club-level role manager may scope roles only to groups
    /// it administers.
    pub fn can_scope_role_to(&self, group_id: Option<Uuid>, is_global: bool) -> bool {
        if self.can_manage_all_roles() {
            return true;
        }
        if is_global {
            return false;
        }
        group_id.map(|g| self.groups.contains(&g)).unwrap_or(false)
    }

    /// Cross-group modification gate: a club-level manager may only modify
    /// users whose group membership intersects its own administered groups.
    pub fn can_modify_user_in(&self, target_groups: &HashSet<Uuid>) -> bool {
        if self.can_manage_all_users() || self.can_manage_all_roles() {
            return true;
        }
        if !self.has_any(&[perms::MANAGE_CLUB_USERS, perms::MANAGE_CLUB_ROLES]) {
            return false;
        }
        target_groups.iter().any(|g| self.groups.contains(g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::permissions as perms;

    fn uid() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn permissions_are_additive_across_roles() {
        // Two roles' permissions union; dropping one never grows the set.
        let both = Principal::new(uid()).with_permissions(vec![
            perms::CREATE_REQUESTS.to_string(),
            perms::VIEW_CLUB_REQUESTS.to_string(),
        ]);
        let one = Principal::new(both.user_id)
            .with_permissions(vec![perms::CREATE_REQUESTS.to_string()]);

        assert!(both.has_permission(perms::CREATE_REQUESTS));
        assert!(both.has_permission(perms::VIEW_CLUB_REQUESTS));
        assert!(one.has_permission(perms::CREATE_REQUESTS));
        assert!(!one.has_permission(perms::VIEW_CLUB_REQUESTS));
    }

    #[test]
    fn empty_principal_fails_closed() {
        let me = uid();
        let p = Principal::new(me);
        assert!(p.is_empty());
        assert_eq!(p.read_scope(), ReadScope::Own(me));
        assert!(!p.can_create_requests());
        assert!(!p.can_manage_request(Some(uid())));
        assert!(!p.can_manage_request(None));
        assert!(!p.can_manage_roles());
        assert!(!p.can_grant_permission(perms::CREATE_REQUESTS));
    }

    #[test]
    fn read_scope_first_match_wins() {
        let g1 = uid();
        let all = Principal::new(uid())
            .with_permissions(vec![perms::VIEW_ALL_REQUESTS.to_string()])
            .with_scoped_permissions(vec![(perms::VIEW_CLUB_REQUESTS.to_string(), g1)]);
        // all-tier beats club-tier even when both are held
        assert_eq!(all.read_scope(), ReadScope::All);

        let club = Principal::new(uid())
            .with_scoped_permissions(vec![(perms::VIEW_CLUB_REQUESTS.to_string(), g1)]);
        assert_eq!(club.read_scope(), ReadScope::Groups([g1].into_iter().collect()));
    }

    #[test]
    fn visibility_is_monotone() {
        let me = uid();
        let other = uid();
        let g1 = uid();
        let g2 = uid();

        let all = ReadScope::All;
        let club = ReadScope::Groups([g1].into_iter().collect());
        let own = ReadScope::Own(me);

        let rows = [
            (Some(g1), me),
            (Some(g1), other),
            (Some(g2), other),
            (None, me),
            (None, other),
        ];

        for (group, owner) in rows {
            if own.permits(group, owner) && group.is_some() {
                // own rows inside g1 are also club-visible
                if group == Some(g1) {
                    assert!(club.permits(group, owner));
                }
            }
            if club.permits(group, owner) {
                assert!(all.permits(group, owner));
            }
        }
    }

    #[test]
    fn club_scope_filters_foreign_groups() {
        let g1 = uid();
        let g2 = uid();
        let p = Principal::new(uid())
            .with_scoped_permissions(vec![(perms::VIEW_CLUB_REQUESTS.to_string(), g1)]);

        let scope = p.read_scope();
        assert!(scope.permits(Some(g1), uid()));
        assert!(!scope.permits(Some(g2), uid()));
        assert!(!scope.permits(None, uid()));
    }

    #[test]
    fn manage_request_gate() {
        let g1 = uid();
        let g2 = uid();

        let org = Principal::new(uid())
            .with_permissions(vec![perms::MANAGE_ALL_REQUESTS.to_string()]);
        assert!(org.can_manage_request(Some(g1)));
        assert!(org.can_manage_request(None));

        let club = Principal::new(uid())
            .with_scoped_permissions(vec![(perms::MANAGE_CLUB_REQUESTS.to_string(), g1)]);
        assert!(club.can_manage_request(Some(g1)));
        assert!(!club.can_manage_request(Some(g2)));
        assert!(!club.can_manage_request(None));
    }

    #[test]
    fn club_role_manager_cannot_grant_protected_or_unheld() {
        let g1 = uid();
        let p = Principal::new(uid()).with_scoped_permissions(vec![
            (perms::MANAGE_CLUB_ROLES.to_string(), g1),
            (perms::VIEW_CLUB_REQUESTS.to_string(), g1),
        ]);

        // held, non-protected: allowed
        assert!(p.can_grant_permission(perms::VIEW_CLUB_REQUESTS));
        // not held: rejected
        assert!(!p.can_grant_permission(perms::MANAGE_CLUB_REQUESTS));
        // protected tier: always rejected without manage_all_roles
        assert!(!p.can_grant_permission(perms::MANAGE_ALL_REQUESTS));
        assert!(!p.can_grant_permission(perms::VIEW_ALL_REQUESTS));

        let admin = Principal::new(uid())
            .with_permissions(vec![perms::MANAGE_ALL_ROLES.to_string()]);
        assert!(admin.can_grant_permission(perms::MANAGE_ALL_REQUESTS));
    }

    #[test]
    fn club_role_manager_scopes_only_to_own_groups() {
        let g1 = uid();
        let g2 = uid();
        let p = Principal::new(uid())
            .with_scoped_permissions(vec![(perms::MANAGE_CLUB_ROLES.to_string(), g1)]);

        assert!(p.can_scope_role_to(Some(g1), false));
        assert!(!p.can_scope_role_to(Some(g2), false));
        assert!(!p.can_scope_role_to(None, true));

        let admin = Principal::new(uid())
            .with_permissions(vec![perms::MANAGE_ALL_ROLES.to_string()]);
        assert!(admin.can_scope_role_to(None, true));
    }

    #[test]
    fn cross_group_user_modification_requires_overlap() {
        let g1 = uid();
        let g2 = uid();
        let p = Principal::new(uid())
            .with_scoped_permissions(vec![(perms::MANAGE_CLUB_USERS.to_string(), g1)]);

        let same: HashSet<Uuid> = [g1].into_iter().collect();
        let disjoint: HashSet<Uuid> = [g2].into_iter().collect();
        let none: HashSet<Uuid> = HashSet::new();

        assert!(p.can_modify_user_in(&same));
        assert!(!p.can_modify_user_in(&disjoint));
        assert!(!p.can_modify_user_in(&none));
    }
}
