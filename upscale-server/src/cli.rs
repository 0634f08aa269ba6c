/// Parsed command-line arguments.
pub struct CliArgs {
    /// Path to configuration file, if provided via `--config-path` or `-c`.
    pub config_path: Option<String>,
    /// Run a worker pool against the configured broker instead of the HTTP server.
    pub worker: bool,
    /// Whether help was requested.
    pub help_requested: bool,
}

impl CliArgs {
    /// Parse command-line arguments.
    ///
    /// Supported flags:
    /// - `--config-path <path>` or `--config-path=<path>` or `-c <path>`: Path to config file
    /// - `--worker`: Run as a worker
    /// - `--help` or `-h`: Print help and exit
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    fn from_args(args: &[String]) -> Self {
        Self {
            config_path: Self::extract_config_path(args),
            worker: args.iter().skip(1).any(|a| a == "--worker"),
            help_requested: args.iter().skip(1).any(|a| a == "--help" || a == "-h"),
        }
    }

    /// Print usage information to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage: upscale-server [--config-path PATH] [--worker] [--help]\n\n\
             --config-path, -c    Path to configuration file (overrides UPSCALE_CONFIG_PATH env var)\n\
             --worker             Consume jobs from queue.broker_url instead of serving HTTP"
        );
    }

    fn extract_config_path(args: &[String]) -> Option<String> {
        let mut i = 1usize;
        while i < args.len() {
            let a = &args[i];
            if let Some(stripped) = a.strip_prefix("--config-path=") {
                return Some(stripped.to_string());
            } else if a == "--config-path" || a == "-c" {
                return args.get(i + 1).cloned();
            } else if let Some(stripped) = a.strip_prefix("-c=") {
                return Some(stripped.to_string());
            }
            i += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_config_path_forms() {
        for form in [
            args(&["bin", "--config-path", "a.toml"]),
            args(&["bin", "--config-path=a.toml"]),
            args(&["bin", "-c", "a.toml"]),
            args(&["bin", "-c=a.toml"]),
        ] {
            assert_eq!(
                CliArgs::from_args(&form).config_path.as_deref(),
                Some("a.toml")
            );
        }
        assert!(CliArgs::from_args(&args(&["bin", "-c"])).config_path.is_none());
    }

    #[test]
    fn parses_worker_and_help() {
        let parsed = CliArgs::from_args(&args(&["bin", "--worker", "-h"]));
        assert!(parsed.worker);
        assert!(parsed.help_requested);
        assert!(!CliArgs::from_args(&args(&["bin"])).worker);
    }
}
