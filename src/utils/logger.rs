use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "mortgage_engine=info";

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// CLI logging. Logs go to stderr so `quote` and `assess` keep stdout for JSON.
pub fn init_cli_logger(verbose: bool) {
    let filter = if verbose {
        env_filter("mortgage_engine=debug,info")
    } else {
        env_filter(DEFAULT_DIRECTIVE)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .compact(),
        )
        .init();
}

pub fn init_lambda_logger() {
    tracing_subscriber::registry()
        .with(env_filter(DEFAULT_DIRECTIVE))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .without_time()
                .json() // CloudWatch indexes JSON fields
                .with_current_span(false),
        )
        .init();
}
