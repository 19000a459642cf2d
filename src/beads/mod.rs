//! The bead store: typed records over the `bd` issue database, with prefix
//! routing and redirect-based workspace views.

pub mod bead;
pub mod cli;
pub mod fields;
pub mod redirect;
pub mod routes;
pub mod store;

#[cfg(test)]
pub mod mem;

pub use bead::{Bead, BeadStatus, BeadType, DepType, Dependency, ListFilter};
pub use cli::CliBeads;
pub use store::{Beads, CreateOpts, UpdateOpts};
