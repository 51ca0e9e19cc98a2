use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::commons::{Addr, Instr, Instructions};
use crate::error::TraceError;

/// Parses one core's trace. Every non-blank line is `<type> <value>` where
/// type 0 is a load, 1 a store and 2 a compute burst; the value is hex.
pub fn parse_trace(text: &str, limit: Option<usize>) -> Result<Instructions, TraceError> {
    let mut insts = Instructions::new();
    for (n, line) in text.lines().enumerate() {
        if limit.is_some_and(|max| insts.len() >= max) {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(op), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TraceError::Malformed { line: n + 1, content: line.to_string() });
        };
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        let val = u32::from_str_radix(digits, 16).map_err(|source| TraceError::Value {
            line: n + 1,
            value: value.to_string(),
            source,
        })?;
        insts.push_back(match op {
            "0" => Instr::Read(Addr(val)),
            "1" => Instr::Write(Addr(val)),
            "2" => Instr::Other(val),
            _ => return Err(TraceError::UnknownOp { line: n + 1, op: op.to_string() }),
        });
    }
    Ok(insts)
}

pub fn load_trace(path: &Path, limit: Option<usize>) -> Result<Instructions, TraceError> {
    let text = fs::read_to_string(path).map_err(|source| TraceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_trace(&text, limit)
}

/// Reads every `<testname>*.data` file in `dir`, one instruction stream per
/// file, in file name order. A file that fails to load gives its core an
/// empty stream.
pub fn read_testfiles(dir: &Path, testname: &str, limit: Option<usize>) -> Result<Vec<Instructions>, TraceError> {
    let entries = fs::read_dir(dir).map_err(|source| TraceError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let mut paths = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(testname) && n.ends_with(".data"))
        })
        .collect::<Vec<PathBuf>>();
    if paths.is_empty() {
        return Err(TraceError::NoTraces {
            dir: dir.display().to_string(),
            name: testname.to_string(),
        });
    }
    paths.sort();

    let insts = paths
        .iter()
        .map(|path| {
            info!("reading file: {}", path.display());
            load_trace(path, limit).unwrap_or_else(|e| {
                warn!("{}: {}, the core gets no instructions", path.display(), e);
                Instructions::new()
            })
        })
        .collect::<Vec<_>>();
    info!("loaded {} traces", insts.len());
    Ok(insts)
}
