use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "forumfeed_core=info,forumfeed_cli=info";
const VERBOSE_DIRECTIVES: &str = "forumfeed_core=debug,forumfeed_cli=debug";

/// Filter used when `RUST_LOG` is unset. `verbose` surfaces the cache and
/// pagination bookkeeping logged at debug level.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_DIRECTIVES
    } else {
        DEFAULT_DIRECTIVES
    }
}

/// Initializes a global tracing subscriber respecting the `RUST_LOG`
/// environment variable. Later calls are no-ops, so both the CLI and tests
/// may invoke it.
pub fn init_tracing(verbose: bool) {
    let env_filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
