mod forage;
mod guard;
mod peek;
mod settings;

use clap::{Parser, Subcommand};

pub use self::{forage::ForageArgs, guard::GuardArgs, peek::PeekArgs};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
#[must_use]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Main command: fetch the prices, optimize the dispatch, and push the schedule to
    /// the inverter.
    #[clap(name = "forage")]
    Forage(Box<ForageArgs>),

    /// Trim the grid-charge rate so the house fuses survive the battery.
    #[clap(name = "guard")]
    Guard(Box<GuardArgs>),

    /// Read-only views of the current state.
    #[clap(name = "peek")]
    Peek(Box<PeekArgs>),
}
