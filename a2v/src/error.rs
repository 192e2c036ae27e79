use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed symbol table at line {line}: {reason}")]
    SymbolTable { line: usize, reason: String },

    #[error("player symbol table is missing required opcode symbol {name}")]
    MissingSymbol { name: String },

    #[error("distance table cache is unusable ({reason})")]
    BadCache { reason: String },
}

pub type Result<T> = std::result::Result<T, EncodeError>;
