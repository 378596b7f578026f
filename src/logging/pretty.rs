//! Colored console output for local development.
//!
//! ```text
//! 14:32:01.234 INFO  | kit::web::app: Serving HTTP on 0.0.0.0:3000
//! ```

use nu_ansi_term::{Color, Style};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

pub struct PrettyConsoleLogFormat;

fn styled(
    writer: &mut Writer<'_>,
    style: Style,
    body: impl FnOnce(&mut Writer<'_>) -> std::fmt::Result,
) -> std::fmt::Result {
    write!(writer, "{}", style.prefix())?;
    body(writer)?;
    write!(writer, "{}", style.suffix())
}

fn level_style(level: &Level) -> Style {
    match *level {
        Level::TRACE => Style::new().fg(Color::Purple),
        Level::DEBUG => Style::new().fg(Color::Blue),
        Level::INFO => Style::new().fg(Color::Green),
        Level::WARN => Style::new().fg(Color::Yellow),
        Level::ERROR => Style::new().fg(Color::Red),
    }
}

impl<S, N> FormatEvent<S, N> for PrettyConsoleLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        styled(&mut writer, Style::new().dimmed(), |w| {
            write!(w, "{} ", chrono::Local::now().format("%T%.3f"))
        })?;
        styled(&mut writer, level_style(metadata.level()), |w| {
            write!(w, "{:<5}", metadata.level())
        })?;

        let nesting = ctx.event_scope().map(|scope| scope.count()).unwrap_or_default();
        styled(&mut writer, Style::new().fg(Color::Magenta), |w| {
            write!(w, " {} ", "|".repeat(nesting.max(1)))
        })?;

        let mut fields = String::new();
        ctx.field_format()
            .format_fields(Writer::new(&mut fields), event)?;

        // Span creation events (FmtSpan::NEW) carry the message "new".
        let new_span = if metadata.is_span() && fields == "new" {
            ctx.event_scope().and_then(|mut scope| scope.next())
        } else {
            None
        };

        match new_span {
            Some(span) => {
                styled(&mut writer, Style::new().fg(Color::Magenta), |w| write!(w, "=> "))?;
                styled(&mut writer, Style::new().dimmed(), |w| {
                    write!(w, "{}: ", metadata.target())
                })?;
                write!(writer, "{}", span.name())?;
                if let Some(span_fields) = span.extensions().get::<FormattedFields<N>>()
                    && !span_fields.is_empty()
                {
                    write!(writer, "{{{}}}", span_fields)?;
                }
            }
            None => {
                styled(&mut writer, Style::new().dimmed(), |w| {
                    write!(w, "{}: ", metadata.target())
                })?;
                write!(writer, "{}", fields)?;
            }
        }

        writeln!(writer)
    }
}
