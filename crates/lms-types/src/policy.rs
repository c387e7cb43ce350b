//! Who may message whom.

use serde::{Deserialize, Serialize};

use crate::models::Role;

/// Role-defined audience that a broadcast resolves to, always within the
/// sender's own library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceSelector {
    /// Every active librarian.
    AllLibrarians,
    /// Every active member.
    AllMembers,
    /// The library's supervisor.
    #[serde(rename = "supervisor")]
    TenantSupervisor,
    /// The library's primary (earliest registered) librarian.
    #[serde(rename = "librarian")]
    TenantLibrarian,
}

impl AudienceSelector {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all_librarians" => Some(Self::AllLibrarians),
            "all_members" => Some(Self::AllMembers),
            "supervisor" => Some(Self::TenantSupervisor),
            "librarian" => Some(Self::TenantLibrarian),
            _ => None,
        }
    }

    /// Role of every user this selector can resolve to.
    pub fn target_role(&self) -> Role {
        match self {
            Self::AllLibrarians | Self::TenantLibrarian => Role::Librarian,
            Self::AllMembers => Role::Member,
            Self::TenantSupervisor => Role::Supervisor,
        }
    }
}

impl Role {
    /// Whether a user with this role may send a direct message to a user with
    /// `recipient` role.
    pub fn can_message(&self, recipient: Role) -> bool {
        match self {
            Role::Supervisor => matches!(recipient, Role::Librarian | Role::Member),
            Role::Librarian => true,
            Role::Member => recipient == Role::Librarian,
        }
    }

    pub fn can_broadcast(&self, audience: AudienceSelector) -> bool {
        use AudienceSelector::*;
        match self {
            Role::Supervisor => matches!(audience, AllLibrarians | TenantLibrarian),
            Role::Librarian => matches!(audience, AllLibrarians | AllMembers | TenantSupervisor),
            Role::Member => matches!(audience, AllLibrarians | TenantLibrarian),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_only_reach_librarians() {
        assert!(Role::Member.can_message(Role::Librarian));
        assert!(!Role::Member.can_message(Role::Member));
        assert!(!Role::Member.can_message(Role::Supervisor));
        assert!(!Role::Member.can_broadcast(AudienceSelector::AllMembers));
        assert!(!Role::Member.can_broadcast(AudienceSelector::TenantSupervisor));
    }

    #[test]
    fn supervisor_cannot_broadcast_to_members() {
        assert!(!Role::Supervisor.can_broadcast(AudienceSelector::AllMembers));
        assert!(Role::Supervisor.can_broadcast(AudienceSelector::AllLibrarians));
        // Individual messages to members are still allowed.
        assert!(Role::Supervisor.can_message(Role::Member));
    }

    #[test]
    fn broadcast_policy_matches_target_role() {
        // Every permitted broadcast must also be a permitted direct message.
        for role in [Role::Supervisor, Role::Librarian, Role::Member] {
            for audience in [
                AudienceSelector::AllLibrarians,
                AudienceSelector::AllMembers,
                AudienceSelector::TenantSupervisor,
                AudienceSelector::TenantLibrarian,
            ] {
                if role.can_broadcast(audience) {
                    assert!(role.can_message(audience.target_role()), "{role} -> {audience:?}");
                }
            }
        }
    }

    #[test]
    fn selector_wire_names() {
        assert_eq!(AudienceSelector::parse("all_librarians"), Some(AudienceSelector::AllLibrarians));
        assert_eq!(AudienceSelector::parse("supervisor"), Some(AudienceSelector::TenantSupervisor));
        assert_eq!(AudienceSelector::parse("individual"), None);

        let json = serde_json::to_string(&AudienceSelector::TenantLibrarian).unwrap();
        assert_eq!(json, "\"librarian\"");
    }
}
