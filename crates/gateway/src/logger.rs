//! Logger initialization for the gateway binary.

use std::fmt::Write;
use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::Once;

use jiff::{Zoned, tz::TimeZone};
use logforth::append::Stderr;
use logforth::filter::EnvFilter;
use logforth::layout::Layout;

use crate::args::Args;

static INIT: Once = Once::new();

/// Formats log lines with a UTC timestamp and a colored level, matching
/// the console output of the process this gateway sits in front of.
#[derive(Debug)]
struct UtcLayout {
    no_color: bool,
}

impl UtcLayout {
    fn new() -> Self {
        Self { no_color: false }
    }

    fn no_color(mut self) -> Self {
        self.no_color = true;
        self
    }
}

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();

        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level_str = if self.no_color {
            format!("{:>5}", record.level())
        } else {
            match record.level() {
                log::Level::Error => format!("\x1b[31m{:>5}\x1b[0m", record.level()),
                log::Level::Warn => format!("\x1b[33m{:>5}\x1b[0m", record.level()),
                log::Level::Info => format!("\x1b[32m{:>5}\x1b[0m", record.level()),
                log::Level::Debug => format!("\x1b[34m{:>5}\x1b[0m", record.level()),
                log::Level::Trace => format!("\x1b[35m{:>5}\x1b[0m", record.level()),
            }
        };
        write!(output, "{level_str}  ")?;
        write!(output, "{}", record.args())?;

        Ok(output.into_bytes())
    }
}

/// Installs the process-wide logger once, ignoring subsequent calls.
pub fn init(args: &Args) {
    let log_filter = args.log_filter.clone();

    INIT.call_once(move || {
        let filter =
            EnvFilter::from_str(&log_filter).unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter is valid"));

        let layout = if std::io::stderr().is_terminal() { UtcLayout::new() } else { UtcLayout::new().no_color() };

        logforth::builder()
            .dispatch(move |d| d.filter(filter).append(Stderr::default().with_layout(layout)))
            .apply();
    });
}
