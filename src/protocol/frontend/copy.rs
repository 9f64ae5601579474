//! COPY and function call frontend messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Write a CopyData message.
pub fn write_copy_data(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_DATA);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a CopyDone message.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::COPY_DONE);
    msg.finish();
}

/// Write a CopyFail message, aborting a COPY FROM STDIN.
pub fn write_copy_fail(buf: &mut Vec<u8>, error_message: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(error_message);
    msg.finish();
}

/// Write a FunctionCall message.
///
/// - `function_oid`: OID of the function to call
/// - `arg_formats`: Format code per argument (or one code for all)
/// - `args`: Pre-encoded argument values, `None` = SQL NULL
/// - `result_format`: Format requested for the result
pub fn write_function_call(
    buf: &mut Vec<u8>,
    function_oid: Oid,
    arg_formats: &[FormatCode],
    args: &[Option<Vec<u8>>],
    result_format: FormatCode,
) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::FUNCTION_CALL);
    msg.write_u32(function_oid);

    msg.write_i16(arg_formats.len() as i16);
    for &fmt in arg_formats {
        msg.write_i16(fmt as i16);
    }

    msg.write_i16(args.len() as i16);
    for value in args {
        msg.write_value(value.as_deref());
    }

    msg.write_i16(result_format as i16);
    msg.finish();
}
