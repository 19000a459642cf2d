//! `gt init`: scaffold a town.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::config::BackendConfig;
use crate::error::GtError;
use crate::town::{RigsFile, TownRecord, write_json_atomic};

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Town name
    pub name: String,
    /// Directory to create the town in (default: current directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

impl InitArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = match self.dir {
            Some(ref dir) => dir.clone(),
            None => std::env::current_dir().context("determining town directory")?,
        };

        if root.join("mayor").join("town.json").is_file() {
            return Err(GtError::Exists(format!("town at {}", root.display())).into());
        }

        std::fs::create_dir_all(root.join("mayor"))?;
        std::fs::create_dir_all(root.join("deacon"))?;
        std::fs::create_dir_all(root.join(".beads"))?;
        std::fs::create_dir_all(root.join("events"))?;
        std::fs::create_dir_all(root.join(".beads-wisp").join("config"))?;

        write_json_atomic(
            &root.join("mayor").join("town.json"),
            &TownRecord::new(&self.name),
        )?;
        write_json_atomic(&root.join("mayor").join("rigs.json"), &RigsFile::default())?;

        let backend = BackendConfig {
            prefix: "hq-".to_string(),
            ..BackendConfig::default()
        };
        backend.save(&root.join(".beads").join("config.yaml"))?;

        // routes.jsonl starts empty; rig registration appends to it
        std::fs::write(root.join(".beads").join("routes.jsonl"), "")?;

        println!("initialized town {} at {}", self.name, root.display());
        Ok(())
    }
}
