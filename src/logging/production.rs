//! Plain text log lines for log aggregation.
//!
//! Format: `LEVEL target: message fields [span{fields}][child{fields}]`

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Writes one line per event without colors or timestamps (the log collector
/// adds those), followed by the fields of all enclosing spans.
pub struct ProductionLogFormat;

impl<S, N> FormatEvent<S, N> for ProductionLogFormat
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
        write!(writer, "{:<5} {}: ", metadata.level(), metadata.target())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        let mut first = true;
        for span in ctx.event_scope().into_iter().flat_map(|scope| scope.from_root()) {
            if first {
                write!(writer, " ")?;
                first = false;
            }

            write!(writer, "[{}", span.name())?;
            if let Some(fields) = span.extensions().get::<FormattedFields<N>>()
                && !fields.is_empty()
            {
                write!(writer, "{{{}}}", fields)?;
            }
            write!(writer, "]")?;
        }

        writeln!(writer)
    }
}
