use std::fmt;

use colored::*;
use tracing::field::{Field, Visit};
use tracing::{Event, Level};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::{self, DefaultFields, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormattedFields, MakeWriter, Subscriber};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::terminal::colors;
use crate::terminal::spinner::{SpinnerWriter, console};

pub const PRINT_TARGET: &str = "scanai::print";
const SUCCESS_TARGET: &str = "scanai::success";

pub struct ScanaiFormatter;

impl<S, N> FormatEvent<S, N> for ScanaiFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> format::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        if meta.target() == PRINT_TARGET {
            let mut raw = RawMessage::default();
            event.record(&mut raw);
            return writeln!(writer, "{}", raw.0);
        }

        let (symbol, color_func): (&str, fn(ColoredString) -> ColoredString) =
            if meta.target() == SUCCESS_TARGET {
                ("[✓]", |s| s.green().bold())
            } else {
                match *meta.level() {
                    Level::TRACE => ("[ ]", |s| s.dimmed()),
                    Level::DEBUG => ("[?]", |s| s.blue()),
                    Level::INFO => ("[+]", |s| s.green().bold()),
                    Level::WARN => ("[*]", |s| s.yellow().bold()),
                    Level::ERROR => ("[-]", |s| s.red().bold()),
                }
            };

        write!(writer, "{} ", color_func(symbol.into()))?;

        // Pipeline lines carry their subnet.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let ext = span.extensions();
                let Some(fields) = ext.get::<FormattedFields<N>>() else {
                    continue;
                };
                if span.name() == "target" && !fields.is_empty() {
                    let subnet = fields.fields.trim_start_matches("subnet=");
                    write!(writer, "{} ", format!("[{subnet}]").color(colors::SUBNET))?;
                }
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

#[derive(Default)]
struct RawMessage(String);

impl Visit for RawMessage {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "raw_msg" {
            self.0.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "raw_msg" {
            self.0.push_str(&format!("{value:?}"));
        }
    }
}

/// Default directives for `-v` / `-q`. `RUST_LOG` overrides them.
fn default_directives(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (q, _) if q > 0 => "warn,scanai::print=info,scanai::success=info",
        (_, 0) => "info",
        (_, 1) => "info,scanai_core=debug,scanai_cli=debug",
        _ => "info,scanai_core=trace,scanai_cli=trace",
    }
}

/// Builds the console subscriber. Colors come from the formatter, so the
/// field formatter must stay plain for span fields to read `subnet=<cidr>`.
pub(crate) fn build_subscriber<W>(
    filter: EnvFilter,
    writer: W,
) -> Subscriber<DefaultFields, ScanaiFormatter, EnvFilter, W>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .event_format(ScanaiFormatter)
        .with_writer(writer)
        .finish()
}

pub fn init_logging(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, quiet)));

    build_subscriber(filter, || SpinnerWriter(console()))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}
