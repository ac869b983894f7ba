/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Config file path from `--config-path <path>`, `--config-path=<path>`,
    /// or `-c <path>`.
    pub config_path: Option<String>,
    pub help_requested: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_args(std::env::args().skip(1))
    }

    fn from_args(args: impl Iterator<Item = String>) -> Self {
        let mut parsed = Self::default();
        let mut args = args.peekable();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => parsed.help_requested = true,
                "--config-path" | "-c" => parsed.config_path = args.next(),
                other => {
                    if let Some(path) = other
                        .strip_prefix("--config-path=")
                        .or_else(|| other.strip_prefix("-c="))
                    {
                        parsed.config_path = Some(path.to_string());
                    }
                }
            }
        }
        parsed
    }

    /// Print usage information to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage: paperflow-server [--config-path PATH] [--help]\n\n\
             --config-path, -c    Path to configuration file (overrides PAPERFLOW_CONFIG_PATH env var)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::from_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn config_path_variants() {
        assert_eq!(
            parse(&["--config-path", "a.toml"]).config_path.as_deref(),
            Some("a.toml")
        );
        assert_eq!(
            parse(&["--config-path=b.yaml"]).config_path.as_deref(),
            Some("b.yaml")
        );
        assert_eq!(parse(&["-c", "c.json"]).config_path.as_deref(), Some("c.json"));
        assert!(parse(&["--config-path"]).config_path.is_none());
    }

    #[test]
    fn help_flag() {
        assert!(parse(&["-h"]).help_requested);
        assert!(!parse(&[]).help_requested);
    }
}
