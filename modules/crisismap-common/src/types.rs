use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// Stored in place of an absent timestamp (not deleted, not blocked).
pub const NEVER: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Map ID that always resolves to the built-in empty map.
pub const EMPTY_MAP_ID: &str = "0";

/// Catalog label that resolves to the empty map in every domain.
pub const EMPTY_LABEL: &str = "empty";

/// Cache key for listings that span every domain.
pub const ALL_DOMAINS: &str = "*";

/// Separator between domain and label in catalog entry keys.
pub const CATALOG_KEY_SEPARATOR: char = ':';

/// Reports at or below this score are hidden. Two plain downvotes are enough.
pub const HIDDEN_SCORE_THRESHOLD: f64 = -2.0;

/// Weight of a reviewer vote relative to an anonymous vote.
pub const REVIEWER_VOTE_WEIGHT: i64 = 1000;

// --- Roles ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    DomainAdmin,
    CatalogEditor,
    MapCreator,
    MapOwner,
    MapEditor,
    MapReviewer,
    MapViewer,
}

/// Map roles from most to least privileged.
pub const MAP_ROLES: [Role; 4] = [
    Role::MapOwner,
    Role::MapEditor,
    Role::MapReviewer,
    Role::MapViewer,
];

/// Domain roles from most to least privileged.
pub const DOMAIN_ROLES: [Role; 3] = [Role::DomainAdmin, Role::CatalogEditor, Role::MapCreator];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::DomainAdmin => "DOMAIN_ADMIN",
            Role::CatalogEditor => "CATALOG_EDITOR",
            Role::MapCreator => "MAP_CREATOR",
            Role::MapOwner => "MAP_OWNER",
            Role::MapEditor => "MAP_EDITOR",
            Role::MapReviewer => "MAP_REVIEWER",
            Role::MapViewer => "MAP_VIEWER",
        }
    }

    pub fn is_map_role(&self) -> bool {
        MAP_ROLES.contains(self)
    }

    pub fn is_domain_role(&self) -> bool {
        DOMAIN_ROLES.contains(self)
    }

    /// Position in its hierarchy; lower is more privileged. `None` for `Admin`.
    fn rank(&self) -> Option<usize> {
        MAP_ROLES
            .iter()
            .position(|r| r == self)
            .or_else(|| DOMAIN_ROLES.iter().position(|r| r == self))
    }

    /// True if holding `self` implies holding `other`.
    pub fn implies(&self, other: Role) -> bool {
        if *self == Role::Admin {
            return true;
        }
        if self.is_map_role() != other.is_map_role() || other == Role::Admin {
            return false;
        }
        match (self.rank(), other.rank()) {
            (Some(mine), Some(theirs)) => mine <= theirs,
            _ => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "DOMAIN_ADMIN" => Ok(Role::DomainAdmin),
            "CATALOG_EDITOR" => Ok(Role::CatalogEditor),
            "MAP_CREATOR" => Ok(Role::MapCreator),
            "MAP_OWNER" => Ok(Role::MapOwner),
            "MAP_EDITOR" => Ok(Role::MapEditor),
            "MAP_REVIEWER" => Ok(Role::MapReviewer),
            "MAP_VIEWER" => Ok(Role::MapViewer),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

// --- Votes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteType {
    AnonymousUp,
    AnonymousDown,
    ReviewerUp,
    ReviewerDown,
}

impl VoteType {
    pub const ALL: [VoteType; 4] = [
        VoteType::AnonymousUp,
        VoteType::AnonymousDown,
        VoteType::ReviewerUp,
        VoteType::ReviewerDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::AnonymousUp => "ANONYMOUS_UP",
            VoteType::AnonymousDown => "ANONYMOUS_DOWN",
            VoteType::ReviewerUp => "REVIEWER_UP",
            VoteType::ReviewerDown => "REVIEWER_DOWN",
        }
    }

    /// Reviewer votes are only available to users with reviewer access.
    pub fn is_privileged(&self) -> bool {
        matches!(self, VoteType::ReviewerUp | VoteType::ReviewerDown)
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VoteType::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("vote type", s))
    }
}

/// Tallies of each vote type on a single report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteCounts {
    pub anonymous_up: i64,
    pub anonymous_down: i64,
    pub reviewer_up: i64,
    pub reviewer_down: i64,
}

impl VoteCounts {
    pub fn get_mut(&mut self, vote_type: VoteType) -> &mut i64 {
        match vote_type {
            VoteType::AnonymousUp => &mut self.anonymous_up,
            VoteType::AnonymousDown => &mut self.anonymous_down,
            VoteType::ReviewerUp => &mut self.reviewer_up,
            VoteType::ReviewerDown => &mut self.reviewer_down,
        }
    }

    pub fn score(&self) -> f64 {
        let plain = self.anonymous_up - self.anonymous_down;
        let reviewed = REVIEWER_VOTE_WEIGHT * (self.reviewer_up - self.reviewer_down);
        (plain + reviewed) as f64
    }

    pub fn is_hidden(&self) -> bool {
        self.score() <= HIDDEN_SCORE_THRESHOLD
    }

    pub fn upvotes(&self) -> i64 {
        self.anonymous_up + self.reviewer_up
    }

    pub fn downvotes(&self) -> i64 {
        self.anonymous_down + self.reviewer_down
    }
}

// --- Users ---

/// The acting user for a request. Anonymous users have an empty ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            id: String::new(),
            email: String::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_empty()
    }

    /// The part of the e-mail address after the `@`, lowercased.
    pub fn email_domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_lowercase())
            .filter(|d| !d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_hierarchy() {
        assert!(Role::MapOwner.implies(Role::MapViewer));
        assert!(Role::MapEditor.implies(Role::MapReviewer));
        assert!(!Role::MapViewer.implies(Role::MapEditor));
        assert!(Role::DomainAdmin.implies(Role::CatalogEditor));
        assert!(Role::CatalogEditor.implies(Role::MapCreator));
        assert!(!Role::MapCreator.implies(Role::CatalogEditor));
        assert!(Role::Admin.implies(Role::MapOwner));
        assert!(!Role::DomainAdmin.implies(Role::MapViewer));
        assert!(!Role::MapOwner.implies(Role::Admin));
    }

    #[test]
    fn role_strings_round_trip() {
        for role in MAP_ROLES.iter().chain(DOMAIN_ROLES.iter()) {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        assert!("OWNER".parse::<Role>().is_err());
    }

    #[test]
    fn vote_type_parse_rejects_unknown() {
        assert_eq!("REVIEWER_UP".parse::<VoteType>().unwrap(), VoteType::ReviewerUp);
        assert!("UP".parse::<VoteType>().is_err());
    }

    #[test]
    fn reviewer_votes_dominate_score() {
        let counts = VoteCounts {
            anonymous_up: 5,
            anonymous_down: 0,
            reviewer_up: 0,
            reviewer_down: 1,
        };
        assert_eq!(counts.score(), -995.0);
        assert!(counts.is_hidden());
    }

    #[test]
    fn two_downvotes_hide() {
        let mut counts = VoteCounts::default();
        *counts.get_mut(VoteType::AnonymousDown) += 1;
        assert!(!counts.is_hidden());
        *counts.get_mut(VoteType::AnonymousDown) += 1;
        assert!(counts.is_hidden());
    }

    #[test]
    fn email_domain_is_lowercased() {
        let user = User::new("1", "Someone@Example.ORG");
        assert_eq!(user.email_domain().as_deref(), Some("example.org"));
        assert_eq!(User::anonymous().email_domain(), None);
    }
}
