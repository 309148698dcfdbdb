//! `genfleet` binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `--log-level`, then `LOG_LEVEL`.
fn fallback_filter(flag: Option<String>, env: Option<String>) -> String {
    flag.or(env).unwrap_or_else(|| "info".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = genfleet::cli::parse_cli();

    let fallback = fallback_filter(cli.log_level.clone(), std::env::var("LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    genfleet::cli::run_with_cli(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_filter_order() {
        assert_eq!(
            fallback_filter(Some("debug".into()), Some("warn".into())),
            "debug"
        );
        assert_eq!(fallback_filter(None, Some("warn".into())), "warn");
        assert_eq!(fallback_filter(None, None), "info");
    }
}
