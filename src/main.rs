#![allow(clippy::doc_markdown)]
#![doc = include_str!("../README.md")]

mod api;
mod cli;
mod core;
mod prelude;
mod quantity;
mod tables;

use clap::{Parser, crate_version};
use tracing::metadata::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    cli::{Args, Command},
    prelude::*,
};

fn main() -> Result {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().without_time().compact().with_filter(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env()?,
        ))
        .init();

    info!(version = crate_version!(), "starting…");
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    match args.command {
        Command::Forage(args) => args.run(),
        Command::Guard(args) => args.run(),
        Command::Peek(args) => args.run(),
    }
}
