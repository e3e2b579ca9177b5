use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "quiet" | "minimal" => Some(Verbosity::Quiet),
            "normal" | "info" => Some(Verbosity::Normal),
            "verbose" => Some(Verbosity::Verbose),
            "debug" | "trace" => Some(Verbosity::Debug),
            _ => None,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "ts1_modloader=error",
            Verbosity::Normal => "ts1_modloader=warn",
            Verbosity::Verbose => "ts1_modloader=info",
            Verbosity::Debug => "ts1_modloader=debug",
        }
    }
}

/// Logs go to stderr so `--format json` output stays clean. `RUST_LOG`
/// overrides the verbosity flags.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
