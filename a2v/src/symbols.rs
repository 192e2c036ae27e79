//! Parses the player assembler's debug output to extract opcode entry
//! addresses.
//!
//! The file is line oriented; `sym` records carry a comma-separated
//! `key=value` list in their second whitespace field, e.g.
//!
//! ```text
//! sym     id=8,name="op_ack",addrsize=absolute,scope=1,val=0x81FA,type=lab
//! ```
//!
//! Only symbols whose name starts with `op_` matter here; all other record
//! types are ignored.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{EncodeError, Result};

/// Parse opcode symbols from a reader, mapping `op_*` names (quotes
/// stripped) to their entry addresses.
pub fn parse<R: BufRead>(reader: R) -> Result<HashMap<String, u16>> {
    let mut syms = HashMap::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if !line.starts_with("sym") {
            continue;
        }
        let lineno = idx + 1;

        let fields = line.split_whitespace().nth(1).ok_or_else(|| {
            EncodeError::SymbolTable {
                line: lineno,
                reason: "sym record has no field list".into(),
            }
        })?;

        let mut name = None;
        let mut val = None;
        for kv in fields.split(',') {
            let (k, v) = kv.split_once('=').ok_or_else(|| EncodeError::SymbolTable {
                line: lineno,
                reason: format!("malformed key=value pair {:?}", kv),
            })?;
            match k {
                "name" => name = Some(v.trim_matches('"').to_string()),
                "val" => val = Some(v),
                _ => {}
            }
        }

        let name = name.ok_or_else(|| EncodeError::SymbolTable {
            line: lineno,
            reason: "sym record has no name".into(),
        })?;
        if !name.starts_with("op_") {
            continue;
        }

        let val = val.ok_or_else(|| EncodeError::SymbolTable {
            line: lineno,
            reason: format!("opcode symbol {} has no val", name),
        })?;
        let addr = val
            .strip_prefix("0x")
            .and_then(|hex| u16::from_str_radix(hex, 16).ok())
            .ok_or_else(|| EncodeError::SymbolTable {
                line: lineno,
                reason: format!("bad address {:?} for {}", val, name),
            })?;

        syms.insert(name, addr);
    }

    Ok(syms)
}

/// Parse opcode symbols from a debug file on disk.
pub fn parse_file(path: &Path) -> Result<HashMap<String, u16>> {
    let file = std::fs::File::open(path)?;
    parse(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DEBUG_FILE: &str = r#"version major=2,minor=0
info    csym=0,file=594,lib=1,line=420,mod=2,scope=2,seg=7,span=255,sym=151,type=5
file    id=0,name="main.s",size=10297,mtime=0x5C766D92,mod=0
line    id=0,file=1,line=60
sym     id=8,name="op_ack",addrsize=absolute,scope=1,def=195,val=0x81FA,type=lab
sym     id=10,name="op_tick_4_page_32",addrsize=absolute,scope=1,def=6,val=0x81EE,type=lab
sym     id=12,name="rle1",addrsize=absolute,scope=1,def=135,ref=373,val=0x81D6,type=lab
"#;

    #[test]
    fn test_parse_keeps_only_op_symbols() {
        let syms = parse(Cursor::new(DEBUG_FILE)).unwrap();
        assert_eq!(syms.len(), 2);
        assert_eq!(syms["op_ack"], 0x81fa);
        assert_eq!(syms["op_tick_4_page_32"], 0x81ee);
    }

    #[test]
    fn test_parse_rejects_bad_address() {
        let bad = "sym id=1,name=\"op_nop\",val=81FA\n";
        assert!(matches!(
            parse(Cursor::new(bad)),
            Err(EncodeError::SymbolTable { line: 1, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        let bad = "sym id=1,val=0x1234\n";
        assert!(parse(Cursor::new(bad)).is_err());
    }

    #[test]
    fn test_parse_ignores_other_records() {
        let syms = parse(Cursor::new("line id=0,file=1\nseg id=2\n")).unwrap();
        assert!(syms.is_empty());
    }
}
