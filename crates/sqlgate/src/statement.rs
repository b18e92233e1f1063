//! Statement extraction from decoded frames

use sqlframe::Frame;

use crate::{grammar::leading_verb, traits::GrammarParser};

/// Command byte of a length-prefixed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Sleep,
    Quit,
    InitDb,
    Query,
    FieldList,
    CreateDb,
    DropDb,
    Refresh,
    Statistics,
    ProcessInfo,
    Connect,
    ProcessKill,
    Debug,
    Ping,
    ChangeUser,
    StmtPrepare,
    StmtExecute,
    StmtSendLongData,
    StmtClose,
    StmtReset,
    SetOption,
    StmtFetch,
    ResetConnection,
    Unknown(u8),
}

impl Command {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Sleep,
            0x01 => Self::Quit,
            0x02 => Self::InitDb,
            0x03 => Self::Query,
            0x04 => Self::FieldList,
            0x05 => Self::CreateDb,
            0x06 => Self::DropDb,
            0x07 => Self::Refresh,
            0x09 => Self::Statistics,
            0x0a => Self::ProcessInfo,
            0x0b => Self::Connect,
            0x0c => Self::ProcessKill,
            0x0d => Self::Debug,
            0x0e => Self::Ping,
            0x11 => Self::ChangeUser,
            0x16 => Self::StmtPrepare,
            0x17 => Self::StmtExecute,
            0x18 => Self::StmtSendLongData,
            0x19 => Self::StmtClose,
            0x1a => Self::StmtReset,
            0x1b => Self::SetOption,
            0x1c => Self::StmtFetch,
            0x1f => Self::ResetConnection,
            other => Self::Unknown(other),
        }
    }

    /// Action name used when the command carries no statement text
    pub fn name(&self) -> String {
        let name = match self {
            Self::Sleep => "sleep",
            Self::Quit => "quit",
            Self::InitDb => "init_db",
            Self::Query => "query",
            Self::FieldList => "field_list",
            Self::CreateDb => "create_db",
            Self::DropDb => "drop_db",
            Self::Refresh => "refresh",
            Self::Statistics => "statistics",
            Self::ProcessInfo => "process_info",
            Self::Connect => "connect",
            Self::ProcessKill => "process_kill",
            Self::Debug => "debug",
            Self::Ping => "ping",
            Self::ChangeUser => "change_user",
            Self::StmtPrepare => "stmt_prepare",
            Self::StmtExecute => "stmt_execute",
            Self::StmtSendLongData => "stmt_send_long_data",
            Self::StmtClose => "stmt_close",
            Self::StmtReset => "stmt_reset",
            Self::SetOption => "set_option",
            Self::StmtFetch => "stmt_fetch",
            Self::ResetConnection => "reset_connection",
            Self::Unknown(byte) => return format!("0x{byte:02x}"),
        };
        name.to_string()
    }

    /// Commands whose body is statement text for the grammar
    pub fn carries_statement(&self) -> bool {
        matches!(self, Self::Query | Self::StmtPrepare)
    }
}

/// Semantic fields extracted from one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    pub action: String,
    pub schema: Option<String>,
    pub table:  Option<String>,
    /// Statement text, or the arguments after the verb of a line command
    pub raw:    Option<String>,
}

impl Statement {
    fn action(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }
}

/// Derive a [`Statement`] from a complete frame.
///
/// Never fails: statement text the grammar rejects still yields the lowercase
/// leading keyword as action, with schema and table left empty. Text holding
/// several statements, or with no readable keyword, gets the command name.
pub fn extract(frame: &Frame, grammar: &dyn GrammarParser) -> Statement {
    if frame.is_line() {
        return extract_line(&frame.body_text());
    }

    let Some(command) = frame.command().map(Command::from_byte) else {
        return Statement::action("empty");
    };
    let text = frame.body_text();

    match command {
        c if c.carries_statement() => extract_sql(c, &text, grammar),
        Command::InitDb => Statement {
            action: command.name(),
            schema: non_empty(text.trim()),
            table:  None,
            raw:    non_empty(&text),
        },
        _ => Statement {
            raw: non_empty(&text),
            ..Statement::action(command.name())
        },
    }
}

fn extract_sql(command: Command, text: &str, grammar: &dyn GrammarParser) -> Statement {
    let raw = non_empty(text);
    match grammar.parse_statement(text) {
        Ok(parsed) => Statement {
            action: parsed.action,
            schema: parsed.schema,
            table: parsed.table,
            raw,
        },
        Err(e) => {
            tracing::trace!(command = %command.name(), error = %e, "grammar fallback");
            Statement {
                action: leading_verb(text).unwrap_or_else(|| command.name()),
                schema: None,
                table: None,
                raw,
            }
        },
    }
}

fn extract_line(text: &str) -> Statement {
    let text = text.trim_start();
    let (action, rest) = match text.split_once(char::is_whitespace) {
        Some((action, rest)) => (action, rest.trim()),
        None => (text.trim_end(), ""),
    };
    Statement {
        raw: non_empty(rest),
        ..Statement::action(action)
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}
