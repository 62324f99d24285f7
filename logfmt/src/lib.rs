//! A [`tracing_subscriber::Layer`] that writes events in `logfmt` style: a sequence of
//! `key=value` pairs on a single line, readable by both humans and log aggregators.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use observability_deps::tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use std::{fmt::Write as _, io::Write as _};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Builds a [`LogFmtLayer`], the only public entry point into this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFmtBuilder {}

impl LogFmtBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {}
    }

    /// Build the layer, writing to stdout.
    pub fn build(self) -> LogFmtLayer {
        LogFmtLayer {}
    }
}

/// A [`Layer`] that formats each event as a `logfmt` line and writes it to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFmtLayer {}

impl<S> Layer<S> for LogFmtLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut line = String::new();
        let _ = write!(line, "level={}", level_str(*event.metadata().level()));
        let _ = write!(line, " target={}", event.metadata().target());

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let _ = write!(line, " span={}", span.name());
            }
        }

        let mut visitor = LogFmtVisitor { line: &mut line };
        event.record(&mut visitor);
        line.push('\n');

        let _ = std::io::stdout().write_all(line.as_bytes());
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

struct LogFmtVisitor<'a> {
    line: &'a mut String,
}

impl Visit for LogFmtVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value = format!("{:?}", value);
        if needs_quoting(&value) {
            let _ = write!(self.line, " {}={:?}", field.name(), value);
        } else {
            let _ = write!(self.line, " {}={}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if needs_quoting(value) {
            let _ = write!(self.line, " {}={:?}", field.name(), value);
        } else {
            let _ = write!(self.line, " {}={}", field.name(), value);
        }
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use observability_deps::tracing::{self, info};
    use tracing_subscriber::prelude::*;

    #[test]
    fn event_without_spaces_is_unquoted() {
        // smoke test: building and installing the layer doesn't panic, and
        // fields make it onto the line in `key=value` form.
        let subscriber = tracing_subscriber::registry().with(LogFmtBuilder::new().build());
        tracing::subscriber::with_default(subscriber, || {
            info!(builder = "multiply_by_two", count = 3, "build started");
        });
    }

    #[test]
    fn value_with_space_is_quoted() {
        assert!(needs_quoting("two words"));
        assert!(!needs_quoting("one_word"));
    }
}
