use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::Command;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use converge_core::{ConvergeError, Result, Rval};
use tracing::debug;

use super::strings::compile;
use crate::context::EvaluationContext;
use crate::functions::{arg_int, arg_str, class_result, ArgType, BuiltinFunction, FunctionRegistry};

use ArgType::{Int, String as Str};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(BuiltinFunction::new("getenv", &[Str, Int], getenv_fn));
    registry.register(BuiltinFunction::new("fileexists", &[Str], fileexists_fn));
    registry.register(BuiltinFunction::new("isdir", &[Str], isdir_fn));
    registry.register(BuiltinFunction::new("isplain", &[Str], isplain_fn));
    registry.register(BuiltinFunction::new("islink", &[Str], islink_fn));
    registry.register(BuiltinFunction::new("readfile", &[Str, Int], readfile_fn));
    registry.register(BuiltinFunction::new(
        "readstringlist",
        &[Str, Str, Str, Int, Int],
        readstringlist_fn,
    ));
    registry.register(BuiltinFunction::new("execresult", &[Str, Str], execresult_fn));
    registry.register(BuiltinFunction::new("returnszero", &[Str, Str], returnszero_fn));
    registry.register(BuiltinFunction::new("now", &[], now_fn));
    registry.register(BuiltinFunction::new("strftime", &[Str, Str, Int], strftime_fn));
}

fn failed(name: &str, message: impl Into<String>) -> ConvergeError {
    ConvergeError::FunctionFailed {
        name: name.into(),
        message: message.into(),
    }
}

fn truncate(mut text: String, max: i64) -> String {
    if max < 0 || text.len() <= max as usize {
        return text;
    }
    let mut end = max as usize;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}

fn getenv_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let name = arg_str("getenv", args, 0)?;
    let max = arg_int("getenv", args, 1)?;
    let value = std::env::var(name).unwrap_or_default();
    Ok(Rval::from(truncate(value, max)))
}

fn fileexists_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(class_result(Path::new(arg_str("fileexists", args, 0)?).exists()))
}

fn isdir_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(class_result(Path::new(arg_str("isdir", args, 0)?).is_dir()))
}

fn isplain_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    Ok(class_result(Path::new(arg_str("isplain", args, 0)?).is_file()))
}

fn islink_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let path = arg_str("islink", args, 0)?;
    let is_link = fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    Ok(class_result(is_link))
}

fn read(function: &str, path: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| failed(function, format!("{}: {}", path, e)))
}

fn readfile_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let path = arg_str("readfile", args, 0)?;
    let max = arg_int("readfile", args, 1)?;
    let content = read("readfile", path)?;
    Ok(Rval::from(truncate(content, max)))
}

/// Reads a file, strips comment matches, and splits the rest into at most
/// `maxent` non-empty items.
fn readstringlist_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let path = arg_str("readstringlist", args, 0)?;
    let comment = arg_str("readstringlist", args, 1)?;
    let split = compile("readstringlist", arg_str("readstringlist", args, 2)?)?;
    let max_entries = arg_int("readstringlist", args, 3)?.max(0) as usize;
    let max_size = arg_int("readstringlist", args, 4)?;

    let mut content = truncate(read("readstringlist", path)?, max_size);
    if !comment.is_empty() {
        let comment = compile("readstringlist", comment)?;
        content = comment.replace_all(&content, "").into_owned();
    }

    let items: Vec<Rval> = split
        .split(&content)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .take(max_entries)
        .map(Rval::from)
        .collect();
    Ok(Rval::List(items))
}

fn command(function: &str, line: &str, shell: &str) -> Result<Command> {
    match shell {
        "useshell" => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            Ok(cmd)
        }
        "noshell" => {
            let mut parts = line.split_whitespace();
            let program = parts
                .next()
                .ok_or_else(|| failed(function, "empty command"))?;
            let mut cmd = Command::new(program);
            cmd.args(parts);
            Ok(cmd)
        }
        other => Err(ConvergeError::ArgumentError {
            function: function.into(),
            message: format!("shell mode must be useshell or noshell, got '{}'", other),
        }),
    }
}

fn execresult_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let line = arg_str("execresult", args, 0)?;
    let mut cmd = command("execresult", line, arg_str("execresult", args, 1)?)?;
    debug!("Running '{}'", line);
    let output = cmd
        .output()
        .map_err(|e| failed("execresult", format!("{}: {}", line, e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(Rval::from(stdout.trim_end_matches('\n').to_string()))
}

fn returnszero_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let line = arg_str("returnszero", args, 0)?;
    let mut cmd = command("returnszero", line, arg_str("returnszero", args, 1)?)?;
    let status = cmd
        .status()
        .map_err(|e| failed("returnszero", format!("{}: {}", line, e)))?;
    Ok(class_result(status.success()))
}

fn now_fn(_ctx: &EvaluationContext, _args: &[Rval]) -> Result<Rval> {
    Ok(Rval::from(Utc::now().timestamp().to_string()))
}

fn strftime_fn(_ctx: &EvaluationContext, args: &[Rval]) -> Result<Rval> {
    let mode = arg_str("strftime", args, 0)?;
    let format = arg_str("strftime", args, 1)?;
    let timestamp = arg_int("strftime", args, 2)?;

    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ConvergeError::ArgumentError {
            function: "strftime".into(),
            message: format!("invalid format '{}'", format),
        });
    }

    let utc: DateTime<Utc> = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| failed("strftime", format!("timestamp {} out of range", timestamp)))?;

    let mut out = String::new();
    let written = match mode {
        "gmtime" => write!(out, "{}", utc.format_with_items(items.iter())),
        "localtime" => write!(
            out,
            "{}",
            utc.with_timezone(&Local).format_with_items(items.iter())
        ),
        other => {
            return Err(ConvergeError::ArgumentError {
                function: "strftime".into(),
                message: format!("mode must be localtime or gmtime, got '{}'", other),
            })
        }
    };
    written.map_err(|e| failed("strftime", e.to_string()))?;
    Ok(Rval::from(out))
}
