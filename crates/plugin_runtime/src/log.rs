//! Plugin log lines
//!
//! Scripts log through the `log` global; external processes write encoded
//! lines to stderr. Both end up here and are re-emitted through `tracing`
//! under the `plugin` target.
//!
//! The stderr encoding prefixes a line with `\x01`, a level character and
//! `\x02`. Level characters: `t` trace, `d` debug, `i` info, `w` warning,
//! `e` error, `p` progress (the message is a float).

const START: char = '\x01';
const END: char = '\x02';

/// Log level of a plugin message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn from_char(c: char) -> Option<Self> {
        match c {
            't' => Some(LogLevel::Trace),
            'd' => Some(LogLevel::Debug),
            'i' => Some(LogLevel::Info),
            'w' => Some(LogLevel::Warn),
            'e' => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// A decoded stderr line
#[derive(Debug, Clone, PartialEq)]
pub enum LogLine {
    Message(LogLevel, String),
    Progress(f64),
}

/// Decode one stderr line. Unprefixed lines are treated as errors, matching
/// what an uncaught exception trace looks like on stderr.
pub fn parse_log_line(line: &str) -> LogLine {
    let line = line.trim_end_matches(['\r', '\n']);

    let Some(rest) = line.strip_prefix(START) else {
        return LogLine::Message(LogLevel::Error, line.to_string());
    };

    let mut chars = rest.chars();
    let (Some(level), Some(END)) = (chars.next(), chars.next()) else {
        return LogLine::Message(LogLevel::Error, line.to_string());
    };
    let message = chars.as_str();

    if level == 'p' {
        if let Ok(progress) = message.trim().parse::<f64>() {
            return LogLine::Progress(progress);
        }
        return LogLine::Message(LogLevel::Warn, format!("invalid progress value: {}", message));
    }

    match LogLevel::from_char(level) {
        Some(level) => LogLine::Message(level, message.to_string()),
        None => LogLine::Message(LogLevel::Error, message.to_string()),
    }
}

/// Emit a plugin message through tracing
pub(crate) fn emit(plugin_id: &str, level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: "plugin", "[{}] {}", plugin_id, message),
        LogLevel::Debug => tracing::debug!(target: "plugin", "[{}] {}", plugin_id, message),
        LogLevel::Info => tracing::info!(target: "plugin", "[{}] {}", plugin_id, message),
        LogLevel::Warn => tracing::warn!(target: "plugin", "[{}] {}", plugin_id, message),
        LogLevel::Error => tracing::error!(target: "plugin", "[{}] {}", plugin_id, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(
            parse_log_line("\x01i\x02hello"),
            LogLine::Message(LogLevel::Info, "hello".into())
        );
        assert_eq!(
            parse_log_line("\x01t\x02deep\n"),
            LogLine::Message(LogLevel::Trace, "deep".into())
        );
        assert_eq!(
            parse_log_line("\x01w\x02careful"),
            LogLine::Message(LogLevel::Warn, "careful".into())
        );
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_log_line("\x01p\x020.25"), LogLine::Progress(0.25));
        assert!(matches!(
            parse_log_line("\x01p\x02half"),
            LogLine::Message(LogLevel::Warn, _)
        ));
    }

    #[test]
    fn test_unprefixed_is_error() {
        assert_eq!(
            parse_log_line("Traceback (most recent call last):"),
            LogLine::Message(LogLevel::Error, "Traceback (most recent call last):".into())
        );
        assert_eq!(
            parse_log_line("\x01"),
            LogLine::Message(LogLevel::Error, "\x01".into())
        );
    }
}
