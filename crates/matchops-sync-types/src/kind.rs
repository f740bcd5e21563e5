use serde::{Deserialize, Serialize};

/// Closed enumeration of entity kinds known to the sync core.
///
/// The core never interprets payload internals beyond the two timestamp
/// fields (see [`crate::timestamp`]); it only needs `EntityKind` to route
/// operations to the right remote call and to key the per-entity FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Player,
    Team,
    TeamRoster,
    Season,
    Tournament,
    Personnel,
    Game,
    PlayerAdjustment,
    Settings,
    WarmupPlan,
}

impl EntityKind {
    /// All kinds, in the dependency order the bulk pusher must respect (§4.5).
    pub const PUSH_ORDER: [EntityKind; 10] = [
        EntityKind::Player,
        EntityKind::Season,
        EntityKind::Tournament,
        EntityKind::Team,
        EntityKind::TeamRoster,
        EntityKind::Personnel,
        EntityKind::Game,
        EntityKind::Settings,
        EntityKind::WarmupPlan,
        EntityKind::PlayerAdjustment,
    ];

    /// Fixed id for kinds that are process-wide singletons.
    pub fn singleton_id(self) -> Option<&'static str> {
        match self {
            EntityKind::Settings => Some("app"),
            EntityKind::WarmupPlan => Some("default"),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Team => "team",
            EntityKind::TeamRoster => "team_roster",
            EntityKind::Season => "season",
            EntityKind::Tournament => "tournament",
            EntityKind::Personnel => "personnel",
            EntityKind::Game => "game",
            EntityKind::PlayerAdjustment => "player_adjustment",
            EntityKind::Settings => "settings",
            EntityKind::WarmupPlan => "warmup_plan",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "player" => EntityKind::Player,
            "team" => EntityKind::Team,
            "team_roster" => EntityKind::TeamRoster,
            "season" => EntityKind::Season,
            "tournament" => EntityKind::Tournament,
            "personnel" => EntityKind::Personnel,
            "game" => EntityKind::Game,
            "player_adjustment" => EntityKind::PlayerAdjustment,
            "settings" => EntityKind::Settings,
            "warmup_plan" => EntityKind::WarmupPlan,
            other => return Err(format!("unknown entity kind '{other}'")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for kind in EntityKind::PUSH_ORDER {
            let parsed: EntityKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn singletons_have_fixed_ids() {
        assert_eq!(EntityKind::Settings.singleton_id(), Some("app"));
        assert_eq!(EntityKind::WarmupPlan.singleton_id(), Some("default"));
        assert_eq!(EntityKind::Player.singleton_id(), None);
    }
}
