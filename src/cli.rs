//! Helpers for stage executables: one JSON record in on stdin, one out on stdout.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::{self, Read, Write};

pub fn parse_stdin<T: DeserializeOwned>() -> Result<T> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;
    parse_record(&input)
}

pub fn parse_record<T: DeserializeOwned>(input: &str) -> Result<T> {
    serde_json::from_str(input).context("request is not a valid record")
}

pub fn print_stdout<T: Serialize>(output: T) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer(&mut handle, &output).context("failed to write response")?;
    writeln!(handle)?;
    handle.flush()?;
    Ok(())
}
