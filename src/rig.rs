//! Rig beads: the durable registration record for a managed repository.
//! Docking is a label on the rig bead so it holds across every clone of the
//! town.

use crate::beads::fields::{get_field, set_fields};
use crate::beads::{Bead, Beads, BeadType, CreateOpts};
use crate::error::GtError;

/// Label that forbids auto-restart of any agent scoped to the rig.
pub const DOCKED_LABEL: &str = "status:docked";

/// Bead id for a rig registration: `hq-<prefix>-rig-<name>`.
pub fn rig_bead_id(prefix: &str, name: &str) -> String {
    format!("hq-{}-rig-{name}", prefix.trim_end_matches('-'))
}

/// Typed view over a rig bead's embedded fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RigFields {
    pub git_url: String,
    pub prefix: String,
}

impl RigFields {
    pub fn parse(description: &str) -> anyhow::Result<Self> {
        let git_url = get_field(description, "git_url")
            .ok_or_else(|| GtError::Invalid("rig bead missing git_url".into()))?;
        let prefix = get_field(description, "prefix")
            .ok_or_else(|| GtError::Invalid("rig bead missing prefix".into()))?;
        Ok(Self {
            git_url: git_url.to_string(),
            prefix: prefix.to_string(),
        })
    }

    pub fn apply(&self, description: &str) -> String {
        set_fields(
            description,
            &[("git_url", self.git_url.as_str()), ("prefix", self.prefix.as_str())],
        )
    }
}

/// Create the rig bead for a newly registered rig.
pub fn create_rig_bead(
    store: &dyn Beads,
    name: &str,
    git_url: &str,
    prefix: &str,
) -> anyhow::Result<Bead> {
    let fields = RigFields {
        git_url: git_url.to_string(),
        prefix: prefix.to_string(),
    };
    store.create_with_id(
        &rig_bead_id(prefix, name),
        &CreateOpts {
            bead_type: BeadType::Rig,
            title: format!("rig {name}"),
            description: fields.apply(""),
            ..CreateOpts::default()
        },
    )
}

/// Read-only dock check, consulted by auto-restart supervisors.
pub fn is_docked(store: &dyn Beads, prefix: &str, name: &str) -> anyhow::Result<bool> {
    let bead = store.show(&rig_bead_id(prefix, name))?;
    Ok(bead.has_label(DOCKED_LABEL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::mem::MemBeads;

    #[test]
    fn bead_id_trims_prefix_dash() {
        assert_eq!(rig_bead_id("gt-", "gastown"), "hq-gt-rig-gastown");
        assert_eq!(rig_bead_id("gt", "gastown"), "hq-gt-rig-gastown");
    }

    #[test]
    fn fields_roundtrip() {
        let fields = RigFields {
            git_url: "git@example.com:org/gastown.git".to_string(),
            prefix: "gt-".to_string(),
        };
        let desc = fields.apply("");
        assert_eq!(RigFields::parse(&desc).unwrap(), fields);
    }

    #[test]
    fn missing_fields_are_invalid() {
        let err = RigFields::parse("prefix: gt-").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::Invalid(_))
        ));
    }

    #[test]
    fn created_rig_is_undocked() {
        let store = MemBeads::new();
        create_rig_bead(&store, "gastown", "url", "gt-").unwrap();
        assert!(!is_docked(&store, "gt-", "gastown").unwrap());
    }

    #[test]
    fn dock_check_on_missing_rig_is_not_found() {
        let store = MemBeads::new();
        let err = is_docked(&store, "gt-", "ghost").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GtError>(),
            Some(GtError::NotFound(_))
        ));
    }
}
