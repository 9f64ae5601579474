//! Extended query protocol state machine.
//!
//! Pipelines are `[Parse] Bind [Describe] Execute Sync`; Sync forces a
//! ReadyForQuery, which re-synchronizes the stream after any error.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    BindComplete, CloseComplete, CommandComplete, DataRow, EmptyQueryResponse, ErrorResponse,
    NoData, ParameterDescription, ParseComplete, PortalSuspended, RawMessage, ReadyForQuery,
    RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_close_statement, write_describe_portal, write_describe_statement,
    write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::statement::StatementDescription;
use crate::types::{ConnInfo, Value, natural_oid};

use super::action::Action;
use super::{StateMachine, parse_async_message};

/// Extended query state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingParamDesc,
    WaitingRowDesc,
    WaitingBind,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// What the pipeline is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    /// Parse + Describe(statement) + Sync
    Prepare,
    /// [Parse] Bind Execute Sync with a cached description
    Execute { reparse: bool },
    /// Parse + Bind + Describe(portal) + Execute + Sync
    ExecuteSql,
    /// Close(statement) + Sync
    CloseStatement,
}

/// Sink for rows produced by an extended query.
///
/// `NoSink` is used by prepare/close pipelines that produce none.
pub struct NoSink;

impl RowHandler for NoSink {
    fn row(
        &mut self,
        _: &ConnInfo,
        _: &RowDescription<'_>,
        _: DataRow<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Extended query protocol flow.
pub struct ExtendedQueryFlow<'a, H> {
    state: State,
    handler: &'a mut H,
    info: &'a ConnInfo,
    operation: Operation,
    error: Option<ServerError>,
    transaction_status: Option<TransactionStatus>,
    suspended: bool,
    description: Option<StatementDescription>,
}

/// Encode parameters using the statement's parameter OIDs.
///
/// Each parameter uses its codec's preferred format. Encoding failures
/// short-circuit before anything is written to the socket.
pub(crate) fn encode_params(
    info: &ConnInfo,
    param_oids: &[u32],
    params: &[Value],
) -> Result<(Vec<FormatCode>, Vec<Option<Vec<u8>>>)> {
    if param_oids.len() != params.len() {
        return Err(Error::Encode(format!(
            "statement expects {} parameters, got {}",
            param_oids.len(),
            params.len()
        )));
    }

    let mut formats = Vec::with_capacity(params.len());
    let mut encoded = Vec::with_capacity(params.len());
    for (&oid, value) in param_oids.iter().zip(params) {
        let format = info.preferred_format(oid);
        formats.push(format);
        let mut framed = Vec::new();
        info.encode(oid, format, value, &mut framed)?;
        // Strip the i32 frame; Bind writes its own. Length -1 is NULL.
        let len = i32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]);
        if len == -1 {
            encoded.push(None);
        } else {
            encoded.push(Some(framed[4..].to_vec()));
        }
    }
    Ok((formats, encoded))
}

/// Result format codes for a statement's columns.
pub(crate) fn result_formats(
    info: &ConnInfo,
    description: &StatementDescription,
) -> Vec<FormatCode> {
    match description.columns() {
        Some(Ok(cols)) => cols
            .fields()
            .iter()
            .map(|f| info.preferred_format(f.type_oid()))
            .collect(),
        // No rows, or an unparsable stored description: let Bind say "all text"
        _ => Vec::new(),
    }
}

/// Rewrite a RowDescription payload's per-field format codes.
///
/// A Describe(statement) response reports the formats of the unbound
/// statement (usually text); rows from a later Execute arrive in the
/// formats requested by Bind, so the cached descriptor must be patched
/// before it is used to decode them.
pub(crate) fn apply_result_formats(payload: &[u8], formats: &[FormatCode]) -> Result<Vec<u8>> {
    use crate::protocol::codec::read_cstring;

    let mut out = payload.to_vec();
    let (_, mut rest) = payload
        .split_at_checked(2)
        .ok_or_else(|| Error::Protocol("RowDescription: truncated header".into()))?;

    const TAIL: usize = 18;
    let mut index = 0;
    while !rest.is_empty() {
        let (_, after_name) = read_cstring(rest)?;
        if after_name.len() < TAIL {
            return Err(Error::Protocol("RowDescription: truncated field".into()));
        }
        let tail_start = payload.len() - after_name.len();
        let format_offset = tail_start + TAIL - 2;
        if let Some(&format) = formats.get(index) {
            out[format_offset..format_offset + 2]
                .copy_from_slice(&(format as u16).to_be_bytes());
        }
        rest = &after_name[TAIL..];
        index += 1;
    }
    Ok(out)
}

impl<'a, H: RowHandler> ExtendedQueryFlow<'a, H> {
    /// Prepare a named statement: Parse + Describe(statement) + Sync.
    pub fn prepare(
        handler: &'a mut H,
        info: &'a ConnInfo,
        buffer_set: &mut BufferSet,
        name: &str,
        sql: &str,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, name, sql, &[]);
        write_describe_statement(&mut buffer_set.write_buffer, name);
        write_sync(&mut buffer_set.write_buffer);

        Self {
            state: State::Initial,
            handler,
            info,
            operation: Operation::Prepare,
            error: None,
            transaction_status: None,
            suspended: false,
            description: Some(StatementDescription::new(name, sql)),
        }
    }

    /// Execute a statement with a cached description: `[Parse] Bind
    /// Execute Sync`.
    ///
    /// The cached description supplies the column layout, so no Describe
    /// round-trip is needed. With `reparse` the SQL goes through the
    /// unnamed statement again (describe cache mode, safe behind
    /// transaction poolers); otherwise Bind references the server-side
    /// statement name.
    pub fn execute(
        handler: &'a mut H,
        info: &'a ConnInfo,
        buffer_set: &mut BufferSet,
        description: &StatementDescription,
        params: &[Value],
        reparse: bool,
    ) -> Result<Self> {
        let (formats, encoded) = encode_params(info, description.param_oids(), params)?;
        let results = result_formats(info, description);

        buffer_set.write_buffer.clear();
        let statement = if reparse {
            write_parse(
                &mut buffer_set.write_buffer,
                "",
                description.sql(),
                description.param_oids(),
            );
            ""
        } else {
            description.name()
        };
        write_bind(
            &mut buffer_set.write_buffer,
            "",
            statement,
            &formats,
            &encoded,
            &results,
        );
        write_execute(&mut buffer_set.write_buffer, "", 0);
        write_sync(&mut buffer_set.write_buffer);

        buffer_set.column_buffer.clear();
        if let Some(payload) = description.row_desc_payload() {
            let patched = apply_result_formats(payload, &results)?;
            buffer_set.column_buffer.extend_from_slice(&patched);
        }

        Ok(Self {
            state: State::Initial,
            handler,
            info,
            operation: Operation::Execute { reparse },
            error: None,
            transaction_status: None,
            suspended: false,
            description: None,
        })
    }

    /// One-shot execution through the unnamed statement: Parse + Bind +
    /// Describe(portal) + Execute + Sync.
    ///
    /// Parameter types are hinted from the values' natural OIDs so the
    /// server does not have to infer them.
    pub fn execute_sql(
        handler: &'a mut H,
        info: &'a ConnInfo,
        buffer_set: &mut BufferSet,
        sql: &str,
        params: &[Value],
    ) -> Result<Self> {
        let param_oids: Vec<u32> = params.iter().map(natural_oid).collect();
        let (formats, encoded) = encode_params(info, &param_oids, params)?;

        buffer_set.write_buffer.clear();
        buffer_set.column_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, "", sql, &param_oids);
        write_bind(&mut buffer_set.write_buffer, "", "", &formats, &encoded, &[]);
        write_describe_portal(&mut buffer_set.write_buffer, "");
        write_execute(&mut buffer_set.write_buffer, "", 0);
        write_sync(&mut buffer_set.write_buffer);

        Ok(Self {
            state: State::Initial,
            handler,
            info,
            operation: Operation::ExecuteSql,
            error: None,
            transaction_status: None,
            suspended: false,
            description: None,
        })
    }

    /// Close a named server-side statement: Close + Sync.
    pub fn close_statement(
        handler: &'a mut H,
        info: &'a ConnInfo,
        buffer_set: &mut BufferSet,
        name: &str,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_close_statement(&mut buffer_set.write_buffer, name);
        write_sync(&mut buffer_set.write_buffer);

        Self {
            state: State::Initial,
            handler,
            info,
            operation: Operation::CloseStatement,
            error: None,
            transaction_status: None,
            suspended: false,
            description: None,
        }
    }

    /// The server error latched during the exchange, if any.
    pub fn take_error(&mut self) -> Option<ServerError> {
        self.error.take()
    }

    /// The statement description collected by a prepare pipeline.
    pub fn take_description(&mut self) -> Option<StatementDescription> {
        self.description.take()
    }

    /// Whether Execute stopped at a row limit rather than completing.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn handle_parse(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::PARSE_COMPLETE {
            return Err(Error::Protocol(format!(
                "expected ParseComplete, got '{}'",
                buffer_set.type_byte as char
            )));
        }
        ParseComplete::parse(&buffer_set.read_buffer)?;
        self.state = match self.operation {
            Operation::Prepare => State::WaitingParamDesc,
            Operation::ExecuteSql | Operation::Execute { .. } => State::WaitingBind,
            Operation::CloseStatement => {
                return Err(Error::Protocol("ParseComplete outside parse".into()));
            }
        };
        Ok(Action::ReadMessage)
    }

    fn handle_param_desc(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::PARAMETER_DESCRIPTION {
            return Err(Error::Protocol(format!(
                "expected ParameterDescription, got '{}'",
                buffer_set.type_byte as char
            )));
        }
        let param_desc = ParameterDescription::parse(&buffer_set.read_buffer)?;
        if let Some(description) = &mut self.description {
            description.set_param_oids(param_desc.oids().to_vec());
        }
        self.state = State::WaitingRowDesc;
        Ok(Action::ReadMessage)
    }

    fn handle_row_desc(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                if let Some(description) = &mut self.description {
                    description.set_row_description(buffer_set.read_buffer.clone());
                }
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::NO_DATA => {
                NoData::parse(&buffer_set.read_buffer)?;
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "expected RowDescription or NoData, got '{}'",
                other as char
            ))),
        }
    }

    fn handle_bind(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::BIND_COMPLETE {
            return Err(Error::Protocol(format!(
                "expected BindComplete, got '{}'",
                buffer_set.type_byte as char
            )));
        }
        BindComplete::parse(&buffer_set.read_buffer)?;
        // Cached-description executions skip Describe; announce the
        // preset columns before the rows arrive.
        if matches!(self.operation, Operation::Execute { .. })
            && !buffer_set.column_buffer.is_empty()
            && self.error.is_none()
        {
            let cols = RowDescription::parse(&buffer_set.column_buffer)?;
            self.handler.result_start(&cols)?;
        }
        self.state = State::ProcessingRows;
        Ok(Action::ReadMessage)
    }

    fn handle_rows(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;

        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                buffer_set.column_buffer.clear();
                buffer_set.column_buffer.extend_from_slice(payload);
                if self.error.is_none() {
                    let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                    self.handler.result_start(&cols)?;
                }
                Ok(Action::ReadMessage)
            }
            msg_type::NO_DATA => {
                NoData::parse(payload)?;
                Ok(Action::ReadMessage)
            }
            msg_type::DATA_ROW => {
                if self.error.is_none() {
                    let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                    let row = DataRow::parse(payload)?;
                    self.handler.row(self.info, &cols, row)?;
                }
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                if self.error.is_none() {
                    let complete = CommandComplete::parse(payload)?;
                    self.handler.result_end(complete)?;
                }
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(payload)?;
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::PORTAL_SUSPENDED => {
                PortalSuspended::parse(payload)?;
                self.suspended = true;
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message in extended rows: '{}'",
                other as char
            ))),
        }
    }

    fn handle_ready(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            msg_type::CLOSE_COMPLETE => {
                CloseComplete::parse(&buffer_set.read_buffer)?;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "expected ReadyForQuery, got '{}'",
                other as char
            ))),
        }
    }
}

impl<H: RowHandler> StateMachine for ExtendedQueryFlow<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        // The constructor pre-filled the write buffer
        if self.state == State::Initial {
            self.state = match self.operation {
                Operation::Prepare | Operation::ExecuteSql => State::WaitingParse,
                Operation::Execute { reparse: true } => State::WaitingParse,
                Operation::Execute { reparse: false } => State::WaitingBind,
                Operation::CloseStatement => State::WaitingReady,
            };
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = parse_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsync(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?.0;
            if self.error.is_none() {
                self.error = Some(error);
            }
            // The server discards the pipeline until Sync's ReadyForQuery
            self.state = State::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingParse => self.handle_parse(buffer_set),
            State::WaitingParamDesc => self.handle_param_desc(buffer_set),
            State::WaitingRowDesc => self.handle_row_desc(buffer_set),
            State::WaitingBind => self.handle_bind(buffer_set),
            State::ProcessingRows => self.handle_rows(buffer_set),
            State::WaitingReady => self.handle_ready(buffer_set),
            _ => Err(Error::Protocol(format!("unexpected state {:?}", self.state))),
        }
    }

    fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CollectHandler;

    fn feed<H: RowHandler>(
        flow: &mut ExtendedQueryFlow<'_, H>,
        set: &mut BufferSet,
        type_byte: u8,
        payload: &[u8],
    ) -> Result<Action> {
        set.type_byte = type_byte;
        set.read_buffer.clear();
        set.read_buffer.extend_from_slice(payload);
        flow.step(set)
    }

    fn int4_row_description(format: u16) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(b"n\0");
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&4_i16.to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&format.to_be_bytes());
        payload
    }

    #[test]
    fn prepare_collects_description() {
        let info = ConnInfo::new();
        let mut handler = NoSink;
        let mut set = BufferSet::new();
        let mut flow = ExtendedQueryFlow::prepare(
            &mut handler,
            &info,
            &mut set,
            "ps1",
            "select n from generate_series(0,$1::int) n",
        );

        assert!(matches!(flow.step(&mut set).unwrap(), Action::WriteAndReadMessage));
        // Parse + Describe + Sync in one write
        assert_eq!(set.write_buffer[0], b'P');

        feed(&mut flow, &mut set, b'1', b"").unwrap();
        let mut params = 1_u16.to_be_bytes().to_vec();
        params.extend_from_slice(&23_u32.to_be_bytes());
        feed(&mut flow, &mut set, b't', &params).unwrap();
        feed(&mut flow, &mut set, b'T', &int4_row_description(0)).unwrap();
        assert!(matches!(
            feed(&mut flow, &mut set, b'Z', b"I").unwrap(),
            Action::Finished
        ));

        let description = flow.take_description().unwrap();
        assert_eq!(description.name(), "ps1");
        assert_eq!(description.param_oids(), &[23]);
        assert_eq!(description.columns().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn execute_sql_row_flow() {
        let info = ConnInfo::new();
        let mut handler: CollectHandler<(i32,)> = CollectHandler::new();
        let mut set = BufferSet::new();
        let mut flow = ExtendedQueryFlow::execute_sql(
            &mut handler,
            &info,
            &mut set,
            "select $1::int",
            &[Value::from(5_i32)],
        )
        .unwrap();

        assert!(matches!(flow.step(&mut set).unwrap(), Action::WriteAndReadMessage));

        feed(&mut flow, &mut set, b'1', b"").unwrap();
        feed(&mut flow, &mut set, b'2', b"").unwrap();
        feed(&mut flow, &mut set, b'T', &int4_row_description(1)).unwrap();

        let mut row = 1_u16.to_be_bytes().to_vec();
        row.extend_from_slice(&4_i32.to_be_bytes());
        row.extend_from_slice(&5_i32.to_be_bytes());
        feed(&mut flow, &mut set, b'D', &row).unwrap();
        feed(&mut flow, &mut set, b'C', b"SELECT 1\0").unwrap();
        assert!(matches!(
            feed(&mut flow, &mut set, b'Z', b"I").unwrap(),
            Action::Finished
        ));

        drop(flow);
        assert_eq!(handler.into_rows(), vec![(5,)]);
    }

    #[test]
    fn encode_failure_short_circuits() {
        let info = ConnInfo::new();
        let mut handler = NoSink;
        let mut set = BufferSet::new();
        set.write_buffer.extend_from_slice(b"sentinel");

        let result = ExtendedQueryFlow::execute_sql(
            &mut handler,
            &info,
            &mut set,
            "select $1",
            &[Value::Undefined],
        );
        assert!(result.is_err());
    }

    #[test]
    fn error_drains_to_ready() {
        let info = ConnInfo::new();
        let mut handler = NoSink;
        let mut set = BufferSet::new();
        let mut flow = ExtendedQueryFlow::execute_sql(
            &mut handler,
            &info,
            &mut set,
            "select nope",
            &[],
        )
        .unwrap();
        flow.step(&mut set).unwrap();

        feed(
            &mut flow,
            &mut set,
            b'E',
            b"SERROR\0VERROR\0C42703\0Mno such column\0\0",
        )
        .unwrap();
        assert!(matches!(
            feed(&mut flow, &mut set, b'Z', b"E").unwrap(),
            Action::Finished
        ));
        assert_eq!(flow.take_error().unwrap().code(), "42703");
        assert_eq!(flow.transaction_status(), Some(TransactionStatus::Failed));
    }

    #[test]
    fn param_count_mismatch() {
        let info = ConnInfo::new();
        let err = encode_params(&info, &[23, 25], &[Value::from(1_i32)]).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn result_format_patching() {
        // Describe(statement) reported text; Bind will request binary
        let payload = int4_row_description(0);
        let patched = apply_result_formats(&payload, &[FormatCode::Binary]).unwrap();
        let cols = RowDescription::parse(&patched).unwrap();
        assert_eq!(cols.fields()[0].format(), FormatCode::Binary);
        // Everything but the format bytes is untouched
        assert_eq!(patched[..payload.len() - 2], payload[..payload.len() - 2]);
    }
}
