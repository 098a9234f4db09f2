//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Filter directive used when `RUST_LOG` is unset
pub fn default_directive(verbose: bool, level: &str) -> String {
    if verbose {
        "debug".to_string()
    } else {
        level.to_string()
    }
}

/// Install a global stderr subscriber.
///
/// `RUST_LOG` wins over `level`; `verbose` forces `debug` when `RUST_LOG` is
/// unset. Calling this twice is harmless.
pub fn init_logging(verbose: bool, level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false, "warn"), "warn");
        assert_eq!(default_directive(true, "warn"), "debug");
    }

    #[test]
    fn test_init_twice() {
        init_logging(false, "info");
        init_logging(true, "info");
    }
}
