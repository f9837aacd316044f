use std::fmt::{self, Write};

/// Check if a string needs colon-prefixing as a trailing argument.
pub fn needs_colon_prefix(s: &str) -> bool {
    s.is_empty() || s.contains(' ') || s.starts_with(':')
}

/// Reject parameters that would break line framing.
pub fn validate_param(param: &str) -> fmt::Result {
    if param.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(fmt::Error);
    }
    Ok(())
}

/// Write `NAME arg arg ...`, colon-prefixing the last argument only if needed.
pub fn write_cmd(f: &mut fmt::Formatter<'_>, cmd: &str, args: &[&str]) -> fmt::Result {
    f.write_str(cmd)?;
    let Some((last, middle)) = args.split_last() else {
        return Ok(());
    };
    for arg in middle {
        validate_param(arg)?;
        f.write_char(' ')?;
        f.write_str(arg)?;
    }
    validate_param(last)?;
    f.write_char(' ')?;
    if needs_colon_prefix(last) {
        f.write_char(':')?;
    }
    f.write_str(last)
}

/// Write `NAME arg arg ... :last`, always colon-prefixing the last argument.
///
/// Used for free-text parameters such as reasons and descriptions.
pub fn write_cmd_freeform(f: &mut fmt::Formatter<'_>, cmd: &str, args: &[&str]) -> fmt::Result {
    f.write_str(cmd)?;
    let Some((last, middle)) = args.split_last() else {
        return Ok(());
    };
    for arg in middle {
        validate_param(arg)?;
        f.write_char(' ')?;
        f.write_str(arg)?;
    }
    validate_param(last)?;
    f.write_str(" :")?;
    f.write_str(last)
}
