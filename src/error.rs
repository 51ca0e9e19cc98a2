use std::num::ParseIntError;

use thiserror::Error;

/// A `SystemSpec` no cache can be built from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("block size ({block_size} bytes) must be a multiple of the word size ({word_size} bytes)")]
    BlockNotWordAligned { block_size: u32, word_size: u32 },

    #[error("address size ({address_size} bytes) must be a multiple of the word size ({word_size} bytes)")]
    AddressNotWordAligned { address_size: u32, word_size: u32 },

    #[error("a {cache_size} byte cache cannot be split into sets of {cache_assoc} blocks of {block_size} bytes")]
    Geometry {
        cache_size: u32,
        block_size: u32,
        cache_assoc: u32,
    },
}

/// Problems reading instruction traces.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected `<type> <value>`, got {content:?}")]
    Malformed { line: usize, content: String },

    #[error("line {line}: unknown instruction type {op:?}")]
    UnknownOp { line: usize, op: String },

    #[error("line {line}: invalid value {value:?}")]
    Value {
        line: usize,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("no trace files matching {name}*.data in {dir}")]
    NoTraces { dir: String, name: String },
}
