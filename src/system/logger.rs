use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variables consulted for filter directives, first match wins.
const FILTER_VARS: [&str; 2] = ["LOADHERD_LOG", "RUST_LOG"];

const DEFAULT_DIRECTIVES: &str = "loadherd=info,warn";
const VERBOSE_DIRECTIVES: &str = "loadherd=debug,info";

/// The filter chosen for this process, plus an environment value that was
/// set but could not be parsed.
#[derive(Debug, PartialEq, Eq)]
struct FilterChoice {
    directives: String,
    rejected: Option<(&'static str, String)>,
}

fn choose_filter<F>(verbose: bool, lookup: F) -> FilterChoice
where
    F: Fn(&str) -> Option<String>,
{
    let fallback = if verbose {
        VERBOSE_DIRECTIVES
    } else {
        DEFAULT_DIRECTIVES
    };
    let Some((var, value)) = FILTER_VARS
        .into_iter()
        .find_map(|var| lookup(var).map(|value| (var, value)))
    else {
        return FilterChoice {
            directives: fallback.to_owned(),
            rejected: None,
        };
    };
    match EnvFilter::try_new(&value) {
        Ok(_) => FilterChoice {
            directives: value,
            rejected: None,
        },
        Err(_) => FilterChoice {
            directives: fallback.to_owned(),
            rejected: Some((var, value)),
        },
    }
}

/// Installs the process-wide subscriber. Only the first call in a process
/// takes effect; later calls report the failure on stderr.
pub fn init_logging(verbose: bool, no_color: bool) {
    let choice = choose_filter(verbose, |var| std::env::var(var).ok());

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(&choice.directives))
        .with_ansi(!no_color)
        .with_target(verbose)
        .with_thread_names(verbose)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Logging already initialised: {}", err);
        return;
    }
    if let Some((var, value)) = choice.rejected {
        warn!(
            "Ignoring invalid {} filter {:?}; using {:?}",
            var, value, choice.directives
        );
    }
}
