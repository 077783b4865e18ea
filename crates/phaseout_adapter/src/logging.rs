#![forbid(unsafe_code)]

use std::fs::OpenOptions;
use std::path::Path;

use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Installs the process logger: stderr always, plus an appending file sink when `file` is set.
pub fn init_logging(level: LevelFilter, file: Option<&Path>) -> Result<(), String> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = file {
        let sink = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| format!("failed to open log file '{}': {}", path.display(), err))?;
        loggers.push(WriteLogger::new(level, Config::default(), sink));
    }
    CombinedLogger::init(loggers).map_err(|err| format!("failed to install logger: {err}"))
}
