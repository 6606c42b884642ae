//! Identity status resolution and the authorization role model.
//!
//! [`resolve_status`] reads the identity flags from the user registry and
//! [`effective_role`] reduces them to exactly one [`Role`]. Route guards and
//! action gates go through [`has_access`] and [`guard_route`]; nothing else
//! combines flags by hand.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::{Address, Registry};
use crate::dispatch::CallDispatcher;
use crate::error::DispatchError;

/// Identity flags for one address as read from the user registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStatus {
    pub address: Address,
    pub registered: bool,
    pub verified: bool,
    pub rejected: bool,
    pub is_admin: bool,
    pub is_inspector: bool,
    /// Empty unless `rejected`.
    #[serde(default)]
    pub rejection_reason: String,
    /// Seconds until a rejected identity may register again.
    #[serde(default)]
    pub cooldown_seconds: u64,
}

impl IdentityStatus {
    /// Status of an address the registry knows nothing about.
    pub fn guest(address: Address) -> Self {
        Self {
            address,
            registered: false,
            verified: false,
            rejected: false,
            is_admin: false,
            is_inspector: false,
            rejection_reason: String::new(),
            cooldown_seconds: 0,
        }
    }

    /// Status of an admin or inspector: registered and verified by definition.
    pub fn privileged(address: Address, is_admin: bool, is_inspector: bool) -> Self {
        Self {
            registered: true,
            verified: true,
            is_admin,
            is_inspector,
            ..Self::guest(address)
        }
    }
}

/// Authorization role. Exactly one applies to any status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Registered,
    Verified,
    Inspector,
    Admin,
    Rejected,
}

impl Role {
    /// Position in the precedence order; higher wins.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Guest => 0,
            Self::Registered => 1,
            Self::Verified => 2,
            Self::Inspector => 3,
            Self::Admin => 4,
            Self::Rejected => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Registered => "registered",
            Self::Verified => "verified",
            Self::Inspector => "inspector",
            Self::Admin => "admin",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical landing locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteId {
    Register,
    PendingVerification,
    Dashboard,
    InspectorDashboard,
    AdminDashboard,
}

impl RouteId {
    pub fn path(self) -> &'static str {
        match self {
            Self::Register => "/register",
            Self::PendingVerification => "/pending-verification",
            Self::Dashboard => "/dashboard",
            Self::InspectorDashboard => "/inspector",
            Self::AdminDashboard => "/admin",
        }
    }
}

/// Outcome of a route guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(RouteId),
}

/// Read every identity flag for `address`.
///
/// Flag reads run concurrently and any failure fails the whole resolution;
/// a partially read status is never returned.
pub async fn resolve_status(
    dispatcher: &CallDispatcher,
    address: Address,
) -> Result<IdentityStatus, DispatchError> {
    let arg = move || vec![Value::String(address.to_string())];
    let flag =
        move |method: &'static str| dispatcher.view_as::<bool>(Registry::Identity, method, arg());

    let (registered, verified, rejected, is_inspector, is_admin, cooldown_seconds) = tokio::try_join!(
        flag("isUserRegistered"),
        flag("isUserVerified"),
        flag("isUserRejected"),
        flag("isInspector"),
        flag("isAdmin"),
        dispatcher.view_u64(Registry::Identity, "getCooldownRemaining", arg()),
    )?;

    if is_admin || is_inspector {
        tracing::debug!(%address, is_admin, is_inspector, "privileged identity");
        return Ok(IdentityStatus::privileged(address, is_admin, is_inspector));
    }

    let rejection_reason = if rejected {
        dispatcher
            .view_as::<String>(Registry::Identity, "getRejectionReason", arg())
            .await?
    } else {
        String::new()
    };

    Ok(IdentityStatus {
        address,
        registered,
        verified: verified && !rejected,
        rejected,
        is_admin: false,
        is_inspector: false,
        rejection_reason,
        cooldown_seconds,
    })
}

/// The single role for `status`: rejected > admin > inspector > verified >
/// registered > guest.
pub fn effective_role(status: &IdentityStatus) -> Role {
    if status.rejected {
        Role::Rejected
    } else if status.is_admin {
        Role::Admin
    } else if status.is_inspector {
        Role::Inspector
    } else if status.verified {
        Role::Verified
    } else if status.registered {
        Role::Registered
    } else {
        Role::Guest
    }
}

/// Where `status` lands by default.
pub fn redirect_route(status: &IdentityStatus) -> RouteId {
    match effective_role(status) {
        Role::Rejected | Role::Registered => RouteId::PendingVerification,
        Role::Admin => RouteId::AdminDashboard,
        Role::Inspector => RouteId::InspectorDashboard,
        Role::Verified => RouteId::Dashboard,
        Role::Guest => RouteId::Register,
    }
}

/// Whether `status` satisfies `required`.
///
/// Admins pass every requirement. Rejected identities pass only requirements
/// no stricter than plain registration. Everyone else needs an equal or higher
/// precedence.
pub fn has_access(status: &IdentityStatus, required: Role) -> bool {
    match effective_role(status) {
        Role::Admin => true,
        Role::Rejected => required.precedence() <= Role::Registered.precedence(),
        role => role.precedence() >= required.precedence(),
    }
}

/// Allow, or redirect to the canonical landing for `status`.
pub fn guard_route(status: &IdentityStatus, required: Role) -> RouteDecision {
    if has_access(status, required) {
        RouteDecision::Allow
    } else {
        RouteDecision::Redirect(redirect_route(status))
    }
}
