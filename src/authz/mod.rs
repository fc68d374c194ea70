//! Authorization: permission catalog, principal resolution, access scopes.
//!
//! Enforcement lives here and in the route handlers that consult it; the
//! database is never queried for request or admin data without first deriving
//! the caller's scope from a resolved [`Principal`]. Resolution is
//! request-scoped: every handler resolves fresh, so role mutations take
//! effect on the next request without cache invalidation.

mod principal;
mod resolver;

pub use principal::{Principal, ReadScope};
pub use resolver::resolve;

/// Permission tiers. Protected permissions carry organization-wide authority
/// and can only be granted by holders of `manage_all_roles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Protected,
    Club,
    User,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Protected => "protected",
            Tier::Club => "club",
            Tier::User => "user",
        }
    }
}

/// Well-known permission names
pub mod permissions {
    // Protected tier
    pub const MANAGE_ALL_USERS: &str = "manage_all_users";
    pub const MANAGE_ALL_ROLES: &str = "manage_all_roles";
    pub const VIEW_ALL_REQUESTS: &str = "view_all_requests";
    pub const MANAGE_ALL_REQUESTS: &str = "manage_all_requests";

    // Club tier
    pub const MANAGE_CLUB_USERS: &str = "manage_club_users";
    pub const MANAGE_CLUB_ROLES: &str = "manage_club_roles";
    pub const VIEW_CLUB_REQUESTS: &str = "view_club_requests";
    pub const MANAGE_CLUB_REQUESTS: &str = "manage_club_requests";

    // User tier
    pub const CREATE_REQUESTS: &str = "create_requests";
}

/// The fixed catalog. The `permissions` table is seeded from the same set by
/// migration; this list is the authority for tier checks.
pub const CATALOG: &[(&str, Tier)] = &[
    (permissions::MANAGE_ALL_USERS, Tier::Protected),
    (permissions::MANAGE_ALL_ROLES, Tier::Protected),
    (permissions::VIEW_ALL_REQUESTS, Tier::Protected),
    (permissions::MANAGE_ALL_REQUESTS, Tier::Protected),
    (permissions::MANAGE_CLUB_USERS, Tier::Club),
    (permissions::MANAGE_CLUB_ROLES, Tier::Club),
    (permissions::VIEW_CLUB_REQUESTS, Tier::Club),
    (permissions::MANAGE_CLUB_REQUESTS, Tier::Club),
    (permissions::CREATE_REQUESTS, Tier::User),
];

pub fn tier_of(name: &str) -> Option<Tier> {
    CATALOG.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
}

/// Unknown names are not protected.
pub fn is_protected(name: &str) -> bool {
    matches!(tier_of(name), Some(Tier::Protected))
}

pub fn is_known_permission(name: &str) -> bool {
    tier_of(name).is_some()
}
