//! Hub identities, connection states, and the pure connection policy.
//!
//! Everything here is computable without a network: which hubs a user needs,
//! how long to wait between automatic reconnect attempts, and which join
//! call a hub issues after connecting.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::UserContext;

/// One logical bidirectional real-time connection, named by role area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubName {
    Operator,
    Host,
    Security,
    Admin,
}

impl HubName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Host => "host",
            Self::Security => "security",
            Self::Admin => "admin",
        }
    }

    /// The canonical post-connect group-join RPC for this hub.
    /// Group membership does not survive a reconnect, so this is re-issued
    /// every time the hub comes (back) up.
    pub fn join_method(&self) -> Option<&'static str> {
        match self {
            Self::Operator => Some("JoinOperatorGroup"),
            Self::Host => Some("JoinHostGroup"),
            Self::Security => Some("JoinSecurityGroup"),
            Self::Admin => Some("JoinAdminGroup"),
        }
    }
}

impl fmt::Display for HubName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle states reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HubState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Permission token that grants the host hub.
pub const INVITATION_READ_PERMISSION: &str = "Invitation.Read";

/// Permission tokens, any one of which grants the security hub.
pub const SECURITY_PERMISSIONS: &[&str] = &[
    "SecurityAlerts.View",
    "EmergencyRoster.View",
    "Lockdown.Manage",
];

/// Compute the hubs a user needs, in open order: host, admin, operator,
/// security. Pure function of role and permissions; never yields duplicates.
pub fn required_hubs(ctx: &UserContext) -> Vec<HubName> {
    let mut hubs = Vec::new();

    if ctx
        .permissions
        .iter()
        .any(|p| p == INVITATION_READ_PERMISSION)
    {
        hubs.push(HubName::Host);
    }

    if ctx.role.eq_ignore_ascii_case("administrator") {
        hubs.push(HubName::Admin);
    }

    if ctx.role.eq_ignore_ascii_case("operator") || ctx.role.eq_ignore_ascii_case("receptionist") {
        hubs.push(HubName::Operator);
    }

    if ctx
        .permissions
        .iter()
        .any(|p| SECURITY_PERMISSIONS.contains(&p.as_str()))
    {
        hubs.push(HubName::Security);
    }

    hubs
}

/// Delay before the `attempt`-th automatic reconnect (0-based): immediate,
/// then 2 s, 10 s, and 30 s for every attempt after that.
pub fn auto_retry_delay(attempt: u32) -> Duration {
    match attempt {
        0 => Duration::ZERO,
        1 => Duration::from_secs(2),
        2 => Duration::from_secs(10),
        _ => Duration::from_secs(30),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx(role: &str, permissions: &[&str]) -> UserContext {
        UserContext {
            role: role.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn administrator_with_invitation_read_gets_host_then_admin() {
        let hubs = required_hubs(&ctx("administrator", &["Invitation.Read"]));
        assert_eq!(hubs, vec![HubName::Host, HubName::Admin]);
    }

    #[test]
    fn role_matching_is_case_insensitive() {
        assert_eq!(
            required_hubs(&ctx("Administrator", &[])),
            vec![HubName::Admin]
        );
        assert_eq!(
            required_hubs(&ctx("RECEPTIONIST", &[])),
            vec![HubName::Operator]
        );
    }

    #[test]
    fn unknown_role_without_permissions_gets_nothing() {
        assert!(required_hubs(&ctx("visitor", &[])).is_empty());
    }

    #[test]
    fn single_security_token_grants_security_once() {
        let hubs = required_hubs(&ctx("operator", &["Lockdown.Manage", "SecurityAlerts.View"]));
        assert_eq!(hubs, vec![HubName::Operator, HubName::Security]);
    }

    #[test]
    fn backoff_schedule_is_immediate_then_capped() {
        assert_eq!(auto_retry_delay(0), Duration::ZERO);
        assert_eq!(auto_retry_delay(1), Duration::from_secs(2));
        assert_eq!(auto_retry_delay(2), Duration::from_secs(10));
        assert_eq!(auto_retry_delay(3), Duration::from_secs(30));
        assert_eq!(auto_retry_delay(17), Duration::from_secs(30));
    }

    #[test]
    fn every_hub_has_a_join_method() {
        for hub in [
            HubName::Operator,
            HubName::Host,
            HubName::Security,
            HubName::Admin,
        ] {
            assert!(hub.join_method().is_some(), "{hub} lost its join method");
        }
    }

    fn permission_token() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Invitation.Read".to_string()),
            Just("Invitation.Write".to_string()),
            Just("SecurityAlerts.View".to_string()),
            Just("EmergencyRoster.View".to_string()),
            Just("Lockdown.Manage".to_string()),
            Just("Reports.View".to_string()),
            "[A-Za-z]{3,12}\\.[A-Za-z]{3,12}",
        ]
    }

    proptest! {
        #[test]
        fn security_hub_iff_a_security_token_is_present(
            role in "[a-z]{3,12}",
            permissions in prop::collection::vec(permission_token(), 0..8),
        ) {
            let hubs = required_hubs(&ctx(&role, &permissions
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()));
            let has_token = permissions
                .iter()
                .any(|p| SECURITY_PERMISSIONS.contains(&p.as_str()));
            let count = hubs.iter().filter(|h| **h == HubName::Security).count();
            prop_assert_eq!(count, usize::from(has_token));
        }

        #[test]
        fn required_hubs_never_contains_duplicates(
            role in "[a-zA-Z]{3,14}",
            permissions in prop::collection::vec(permission_token(), 0..10),
        ) {
            let hubs = required_hubs(&ctx(&role, &permissions
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()));
            let mut seen = hubs.clone();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), hubs.len());
        }
    }
}
