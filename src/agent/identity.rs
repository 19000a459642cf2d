//! Agent identity: parsing target expressions, composing session names and
//! bead ids, and classifying session names back into identities.
//!
//! Rig and agent names are single lowercase tokens (`[a-z0-9_]+`, no
//! hyphens); session names use `-` as the separator, so hyphen-free tokens
//! keep classification unambiguous. Dog names are the one exception: they
//! live at the end of their session name and may contain hyphens.

use std::fmt;

use crate::error::GtError;

/// The session-name prefix for rig-scoped agents of this town.
pub const TOWN_SESSION_PREFIX: &str = "gt";

/// Every role the town knows. `Unknown` exists because classification is
/// total: any session name maps to something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Mayor,
    Deacon,
    Boot,
    Witness,
    Refinery,
    Polecat,
    Crew,
    Dog,
    Unknown,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mayor => "mayor",
            Self::Deacon => "deacon",
            Self::Boot => "boot",
            Self::Witness => "witness",
            Self::Refinery => "refinery",
            Self::Polecat => "polecat",
            Self::Crew => "crew",
            Self::Dog => "dog",
            Self::Unknown => "unknown",
        }
    }

    /// Persistent agents survive docking and are never auto-reaped.
    pub const fn is_persistent(self) -> bool {
        matches!(self, Self::Mayor | Self::Deacon | Self::Crew)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = std::convert::Infallible;

    /// Total, mirroring the classifier: unrecognized strings are `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mayor" => Self::Mayor,
            "deacon" => Self::Deacon,
            "boot" => Self::Boot,
            "witness" => Self::Witness,
            "refinery" => Self::Refinery,
            "polecat" => Self::Polecat,
            "crew" => Self::Crew,
            "dog" => Self::Dog,
            _ => Self::Unknown,
        })
    }
}

/// Agent bead lifecycle states, owned by the registry as a `state:` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Spawning,
    Idle,
    Working,
    Stopped,
    Failed,
}

impl AgentState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Legal transitions: spawning→idle on heartbeat, idle↔working on
    /// hook/done, anything→stopped or →failed.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Spawning, Self::Idle)
                | (Self::Idle, Self::Working)
                | (Self::Working, Self::Idle)
                | (_, Self::Stopped)
                | (_, Self::Failed)
        )
    }

    pub fn label(self) -> String {
        format!("state:{}", self.as_str())
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentState {
    type Err = GtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawning" => Ok(Self::Spawning),
            "idle" => Ok(Self::Idle),
            "working" => Ok(Self::Working),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            other => Err(GtError::Invalid(format!("unknown agent state {other:?}"))),
        }
    }
}

/// A parsed agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub role: Role,
    pub rig: Option<String>,
    pub name: Option<String>,
}

fn valid_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

fn valid_dog_name(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

impl Identity {
    pub const fn town(role: Role) -> Self {
        Self {
            role,
            rig: None,
            name: None,
        }
    }

    pub fn rig_scoped(role: Role, rig: &str) -> Self {
        Self {
            role,
            rig: Some(rig.to_string()),
            name: None,
        }
    }

    pub fn named(role: Role, rig: Option<&str>, name: &str) -> Self {
        Self {
            role,
            rig: rig.map(str::to_string),
            name: Some(name.to_string()),
        }
    }

    /// Parse an identity expression. Canonical shapes:
    ///
    /// - `<rig>/polecats/<name>`, `<rig>/crew/<name>`
    /// - `<rig>/witness`, `<rig>/refinery`
    /// - `mayor`, `deacon`, `witness`, `refinery`, `boot`
    ///
    /// Legacy synonyms `deacon/boot`, `deacon/dogs`, and
    /// `deacon/dogs/<name>` are accepted per their roles.
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = expr.split('/').collect();
        let identity = match parts.as_slice() {
            ["mayor"] => Self::town(Role::Mayor),
            ["deacon"] => Self::town(Role::Deacon),
            ["boot"] | ["deacon", "boot"] => Self::town(Role::Boot),
            ["witness"] => Self::town(Role::Witness),
            ["refinery"] => Self::town(Role::Refinery),
            ["deacon", "dogs"] => Self::town(Role::Dog),
            ["deacon", "dogs", name] if valid_dog_name(name) => {
                Self::named(Role::Dog, None, name)
            }
            [rig, "witness"] if valid_token(rig) => Self::rig_scoped(Role::Witness, rig),
            [rig, "refinery"] if valid_token(rig) => Self::rig_scoped(Role::Refinery, rig),
            [rig, "polecats", name] if valid_token(rig) && valid_token(name) => {
                Self::named(Role::Polecat, Some(*rig), name)
            }
            [rig, "crew", name] if valid_token(rig) && valid_token(name) => {
                Self::named(Role::Crew, Some(*rig), name)
            }
            _ => return Err(GtError::Invalid(format!("bad agent identity {expr:?}")).into()),
        };
        Ok(identity)
    }

    /// The canonical identity expression (inverse of [`Identity::parse`]).
    pub fn expr(&self) -> String {
        match (self.role, self.rig.as_deref(), self.name.as_deref()) {
            (Role::Polecat, Some(rig), Some(name)) => format!("{rig}/polecats/{name}"),
            (Role::Crew, Some(rig), Some(name)) => format!("{rig}/crew/{name}"),
            (Role::Witness, Some(rig), _) => format!("{rig}/witness"),
            (Role::Refinery, Some(rig), _) => format!("{rig}/refinery"),
            (Role::Dog, _, Some(name)) => format!("deacon/dogs/{name}"),
            (Role::Dog, _, None) => "deacon/dogs".to_string(),
            (role, _, _) => role.to_string(),
        }
    }

    /// Terminal session name for this identity, under the given town prefix.
    pub fn session_name(&self, town_prefix: &str) -> anyhow::Result<String> {
        let name = match (self.role, self.rig.as_deref(), self.name.as_deref()) {
            (Role::Mayor, _, _) => "hq-mayor".to_string(),
            (Role::Deacon, _, _) => "hq-deacon".to_string(),
            (Role::Boot, _, _) => "hq-boot".to_string(),
            (Role::Dog, _, Some(name)) => format!("hq-deacon-{name}"),
            (Role::Witness, Some(rig), _) => format!("{town_prefix}-{rig}-witness"),
            (Role::Refinery, Some(rig), _) => format!("{town_prefix}-{rig}-refinery"),
            (Role::Polecat, Some(rig), Some(name)) => format!("{town_prefix}-{rig}-{name}"),
            (Role::Crew, Some(rig), Some(name)) => format!("{town_prefix}-{rig}-crew-{name}"),
            _ => {
                return Err(GtError::Invalid(format!(
                    "identity {} has no session form",
                    self.expr()
                ))
                .into());
            }
        };
        Ok(name)
    }

    /// Agent bead id. Town-scoped agents live under `hq-`; rig-scoped ones
    /// under the rig's bead prefix (e.g. `gt-`).
    pub fn bead_id(&self, rig_prefix: &str) -> anyhow::Result<String> {
        let id = match (self.role, self.rig.as_deref(), self.name.as_deref()) {
            (Role::Mayor, _, _) => "hq-mayor".to_string(),
            (Role::Deacon, _, _) => "hq-deacon".to_string(),
            (Role::Boot, _, _) => "hq-boot".to_string(),
            (Role::Dog, _, Some(name)) => format!("hq-dog-{name}"),
            (Role::Witness, Some(rig), _) => format!("{rig_prefix}{rig}-witness"),
            (Role::Refinery, Some(rig), _) => format!("{rig_prefix}{rig}-refinery"),
            (Role::Polecat, Some(rig), Some(name)) => {
                format!("{rig_prefix}{rig}-polecat-{name}")
            }
            (Role::Crew, Some(rig), Some(name)) => format!("{rig_prefix}{rig}-crew-{name}"),
            _ => {
                return Err(GtError::Invalid(format!(
                    "identity {} has no bead form",
                    self.expr()
                ))
                .into());
            }
        };
        Ok(id)
    }

    /// Classify a session name back into an identity. Total: names that fit
    /// no known shape come back as `Role::Unknown` with the raw name.
    pub fn classify(session: &str, town_prefix: &str) -> Self {
        if let Some(rest) = session.strip_prefix("hq-") {
            return match rest {
                "mayor" => Self::town(Role::Mayor),
                "deacon" => Self::town(Role::Deacon),
                "boot" => Self::town(Role::Boot),
                _ => rest.strip_prefix("deacon-").map_or_else(
                    || Self::named(Role::Unknown, None, session),
                    |name| Self::named(Role::Dog, None, name),
                ),
            };
        }

        let Some(rest) = session.strip_prefix(&format!("{town_prefix}-")) else {
            return Self::named(Role::Unknown, None, session);
        };

        // Legacy witness form: <tp>-witness-<rig>.
        if let Some(rig) = rest.strip_prefix("witness-") {
            if valid_token(rig) {
                return Self::rig_scoped(Role::Witness, rig);
            }
        }

        let parts: Vec<&str> = rest.split('-').collect();
        match parts.as_slice() {
            [rig, "witness"] if valid_token(rig) => Self::rig_scoped(Role::Witness, rig),
            [rig, "refinery"] if valid_token(rig) => Self::rig_scoped(Role::Refinery, rig),
            [rig, "crew", name] if valid_token(rig) && valid_token(name) => {
                Self::named(Role::Crew, Some(*rig), name)
            }
            [rig, name] if valid_token(rig) && valid_token(name) => {
                Self::named(Role::Polecat, Some(*rig), name)
            }
            _ => Self::named(Role::Unknown, None, session),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonical_shapes() {
        assert_eq!(
            Identity::parse("gastown/polecats/nux").unwrap(),
            Identity::named(Role::Polecat, Some("gastown"), "nux")
        );
        assert_eq!(
            Identity::parse("gastown/crew/max").unwrap(),
            Identity::named(Role::Crew, Some("gastown"), "max")
        );
        assert_eq!(
            Identity::parse("gastown/witness").unwrap(),
            Identity::rig_scoped(Role::Witness, "gastown")
        );
        assert_eq!(Identity::parse("mayor").unwrap(), Identity::town(Role::Mayor));
        assert_eq!(Identity::parse("boot").unwrap(), Identity::town(Role::Boot));
    }

    #[test]
    fn parse_legacy_synonyms() {
        assert_eq!(
            Identity::parse("deacon/boot").unwrap(),
            Identity::town(Role::Boot)
        );
        assert_eq!(
            Identity::parse("deacon/dogs").unwrap(),
            Identity::town(Role::Dog)
        );
        assert_eq!(
            Identity::parse("deacon/dogs/rex").unwrap(),
            Identity::named(Role::Dog, None, "rex")
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "gastown/polecats", "Gastown/crew/max", "a/b/c/d", "gastown/polecats/Nux"] {
            assert!(Identity::parse(bad).is_err(), "expected rejection for {bad:?}");
        }
    }

    #[test]
    fn session_names() {
        let cases = [
            ("gastown/polecats/nux", "gt-gastown-nux"),
            ("gastown/crew/max", "gt-gastown-crew-max"),
            ("gastown/witness", "gt-gastown-witness"),
            ("gastown/refinery", "gt-gastown-refinery"),
            ("mayor", "hq-mayor"),
            ("deacon", "hq-deacon"),
            ("deacon/dogs/rex", "hq-deacon-rex"),
        ];
        for (expr, session) in cases {
            let id = Identity::parse(expr).unwrap();
            assert_eq!(id.session_name("gt").unwrap(), session, "for {expr}");
        }
    }

    #[test]
    fn bead_ids() {
        let cases = [
            ("gastown/polecats/nux", "gt-gastown-polecat-nux"),
            ("gastown/crew/max", "gt-gastown-crew-max"),
            ("gastown/witness", "gt-gastown-witness"),
            ("gastown/refinery", "gt-gastown-refinery"),
            ("mayor", "hq-mayor"),
            ("deacon/dogs/rex", "hq-dog-rex"),
        ];
        for (expr, bead) in cases {
            let id = Identity::parse(expr).unwrap();
            assert_eq!(id.bead_id("gt-").unwrap(), bead, "for {expr}");
        }
    }

    #[test]
    fn classify_roundtrips_canonical_sessions() {
        for expr in [
            "gastown/polecats/nux",
            "gastown/crew/max",
            "gastown/witness",
            "gastown/refinery",
            "mayor",
            "deacon",
            "deacon/dogs/rex",
        ] {
            let id = Identity::parse(expr).unwrap();
            let session = id.session_name("gt").unwrap();
            let classified = Identity::classify(&session, "gt");
            assert_eq!(classified, id, "roundtrip for {expr} via {session}");
        }
    }

    #[test]
    fn classify_legacy_witness_session() {
        let id = Identity::classify("gt-witness-gastown", "gt");
        assert_eq!(id, Identity::rig_scoped(Role::Witness, "gastown"));
        // reconstruction yields the canonical equivalent
        assert_eq!(id.session_name("gt").unwrap(), "gt-gastown-witness");
    }

    #[test]
    fn classify_is_total() {
        for odd in ["", "zz-what-ever", "gt-", "hq-somethingelse", "gt-UPPER-case"] {
            let id = Identity::classify(odd, "gt");
            assert_eq!(id.role, Role::Unknown, "for {odd:?}");
        }
    }

    #[test]
    fn classify_dog_names_may_contain_hyphens() {
        let id = Identity::classify("hq-deacon-mad-dog", "gt");
        assert_eq!(id, Identity::named(Role::Dog, None, "mad-dog"));
    }

    #[test]
    fn state_machine_transitions() {
        use AgentState::{Failed, Idle, Spawning, Stopped, Working};
        assert!(Spawning.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Working));
        assert!(Working.can_transition_to(Idle));
        assert!(Spawning.can_transition_to(Stopped));
        assert!(Working.can_transition_to(Failed));
        assert!(!Spawning.can_transition_to(Working));
        assert!(!Idle.can_transition_to(Spawning));
    }

    #[test]
    fn persistence_classes() {
        assert!(Role::Crew.is_persistent());
        assert!(Role::Mayor.is_persistent());
        assert!(!Role::Polecat.is_persistent());
        assert!(!Role::Dog.is_persistent());
    }
}
