//! Tracing bootstrap for the terminal app.
//!
//! Output goes to stderr so the chat transcript on stdout stays readable.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,trafellow_term=debug,chat_client=debug";
const APP_FILTER_ENV: &str = "TRAFELLOW_TERM_LOG";
const GENERIC_FILTER_ENV: &str = "TRAFELLOW_LOG";

/// Initialize the global tracing subscriber with severity gating from
/// environment.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `TRAFELLOW_TERM_LOG`
/// 3) `TRAFELLOW_LOG`
/// 4) internal default filter
pub fn init() {
    let directives = select_directives(|key| env::var(key).ok());
    let env_filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn select_directives<F>(mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    for key in [EnvFilter::DEFAULT_ENV, APP_FILTER_ENV, GENERIC_FILTER_ENV] {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty())
            && EnvFilter::try_new(&value).is_ok()
        {
            return value;
        }
    }
    DEFAULT_FILTER.to_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn directives_from_pairs(pairs: &[(&str, &str)]) -> String {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        select_directives(|key| map.get(key).cloned())
    }

    #[test]
    fn falls_back_to_default_filter() {
        assert_eq!(directives_from_pairs(&[]), DEFAULT_FILTER);
        assert_eq!(directives_from_pairs(&[("TRAFELLOW_LOG", "  ")]), DEFAULT_FILTER);
    }

    #[test]
    fn rust_log_wins_over_app_variables() {
        let directives = directives_from_pairs(&[
            ("RUST_LOG", "warn"),
            ("TRAFELLOW_TERM_LOG", "debug"),
            ("TRAFELLOW_LOG", "trace"),
        ]);
        assert_eq!(directives, "warn");
    }

    #[test]
    fn app_variable_wins_over_generic_one() {
        let directives =
            directives_from_pairs(&[("TRAFELLOW_TERM_LOG", "debug"), ("TRAFELLOW_LOG", "trace")]);
        assert_eq!(directives, "debug");

        let directives = directives_from_pairs(&[("TRAFELLOW_LOG", "chat_core=trace")]);
        assert_eq!(directives, "chat_core=trace");
    }

    #[test]
    fn unparsable_directive_is_skipped() {
        let directives =
            directives_from_pairs(&[("RUST_LOG", "chat_core=loudest"), ("TRAFELLOW_LOG", "error")]);
        assert_eq!(directives, "error");
    }
}
