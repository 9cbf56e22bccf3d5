//! Process entry: parses arguments, sets up logging, configuration and the
//! runtime, then runs the console or an agent.
mod plan;

use clap::{CommandFactory, FromArgMatches};

use crate::args::LoadherdArgs;
use crate::error::AppResult;
use plan::{build_plan, execute_plan};

/// Runs the `loadherd` command line.
///
/// # Errors
///
/// Returns an error if the arguments or configuration are invalid, the
/// runtime cannot be built, or the selected role fails.
pub fn run() -> AppResult<()> {
    let matches = LoadherdArgs::command().get_matches_from(std::env::args_os());
    let args = LoadherdArgs::from_arg_matches(&matches)?;

    crate::system::logger::init_logging(args.verbose, args.no_color);

    let plan = build_plan(args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute_plan(plan))
}
