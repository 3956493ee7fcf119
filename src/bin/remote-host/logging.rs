use std::io::Write;
use std::path::Path;

use color_eyre::eyre::Result as EyreResult;
use flexi_logger::{
    DeferredNow, Duplicate, FileSpec, LogSpecification, Logger, LoggerHandle, Record,
};
use log::LevelFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn log_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(
        w,
        "{} - {} - {}",
        now.format(TIMESTAMP_FORMAT),
        record.level(),
        record.args()
    )
}

/// Log to stdout, and also append to `log_file` when one is given.
///
/// The returned handle must be held until exit or file output stops.
pub fn setup_logger(level: LevelFilter, log_file: Option<&Path>) -> EyreResult<LoggerHandle> {
    let spec = LogSpecification::builder().default(level).build();
    let logger = Logger::with(spec).format(log_format);

    let logger = match log_file {
        Some(path) => logger
            .log_to_file(FileSpec::try_from(path)?.suppress_timestamp())
            .append()
            .duplicate_to_stdout(Duplicate::All),
        None => logger.log_to_stdout(),
    };

    Ok(logger.start()?)
}
