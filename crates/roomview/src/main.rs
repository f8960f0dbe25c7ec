mod bootstrap;
mod cli;
mod locomotion;
mod paths;
mod room;
mod run;

use anyhow::Result;

fn main() -> Result<()> {
    let args = cli::parse();
    run::run(args)
}
