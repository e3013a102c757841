use std::io::Write;

use flexi_logger::DeferredNow;
use log::{Level, Record};

/// `<time> <LEVEL> <message>`, with the module path only at debug and below.
pub fn cli_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    let time = now.format("%H:%M:%S%.3f");
    match record.level() {
        Level::Debug | Level::Trace => write!(
            w,
            "{time} {:<5} [{}] {}",
            record.level(),
            record.module_path().unwrap_or("<unknown>"),
            record.args()
        ),
        level => write!(w, "{time} {level:<5} {}", record.args()),
    }
}
