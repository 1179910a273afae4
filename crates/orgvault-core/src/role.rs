//! Roles and the role guard.
//!
//! Roles form a closed, totally ordered set: `Normal < Management < Admin`.
//! The derived [`Ord`] follows declaration order, so a single comparison
//! decides every gate and `Admin`, being the maximum, passes all of them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RoleError;

/// A user's role.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can read and add credentials in their own divisions.
    #[default]
    Normal,
    /// Can additionally update credentials.
    Management,
    /// Can manage the hierarchy, memberships and roles.
    Admin,
}

impl Role {
    /// Every role, lowest first.
    pub const ALL: [Role; 3] = [Role::Normal, Role::Management, Role::Admin];

    /// The lowercase wire name of this role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Management => "management",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "normal" => Ok(Self::Normal),
            "management" => Ok(Self::Management),
            "admin" => Ok(Self::Admin),
            other => Err(RoleError::Unknown {
                value: other.to_owned(),
            }),
        }
    }
}

/// Whether a caller holding `actual` may perform an operation that needs `required`.
#[must_use]
pub fn permits(actual: Role, required: Role) -> bool {
    actual >= required
}

/// Guard form of [`permits`].
///
/// # Errors
///
/// Returns [`RoleError::Insufficient`] if `actual` is below `required`.
pub fn require(actual: Role, required: Role) -> Result<(), RoleError> {
    if permits(actual, required) {
        Ok(())
    } else {
        Err(RoleError::Insufficient { required, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_total_and_monotone() {
        for (i, lower) in Role::ALL.iter().enumerate() {
            for (j, higher) in Role::ALL.iter().enumerate() {
                assert_eq!(permits(*higher, *lower), j >= i, "{higher} vs {lower}");
            }
        }
    }

    #[test]
    fn admin_satisfies_everything() {
        for required in Role::ALL {
            assert!(permits(Role::Admin, required));
        }
    }

    #[test]
    fn normal_cannot_act_as_management() {
        assert!(!permits(Role::Normal, Role::Management));
        let err = require(Role::Normal, Role::Management).unwrap_err();
        assert!(matches!(
            err,
            RoleError::Insufficient {
                required: Role::Management,
                actual: Role::Normal
            }
        ));
    }

    #[test]
    fn parse_accepts_only_known_roles() {
        assert_eq!("management".parse::<Role>().unwrap(), Role::Management);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("superuser".parse::<Role>().is_err());
        assert!("Admin".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn default_is_normal() {
        assert_eq!(Role::default(), Role::Normal);
        assert_eq!(serde_json::to_string(&Role::Management).unwrap(), "\"management\"");
    }
}
