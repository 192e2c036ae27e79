use std::collections::HashMap;
use std::path::Path;

use clap::Parser;
use serde::Serialize;

use a2v::audio::SAMPLE_RATE;
use a2v::mux::BLOCK_SIZE;
use a2v::symbols;

#[derive(Parser)]
#[command(name = "a2v-info", about = "Parse and display a2v stream structure")]
struct Args {
    /// Input .a2m stream
    #[arg(required_unless_present = "version")]
    input: Option<String>,

    /// Player symbol table the stream was encoded against
    #[arg(long = "symbol-table", default_value = "player/a2v.dbg")]
    symbol_table: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,
}

/// Opcode class recovered from the symbol table's entry addresses.
#[derive(Debug, Clone, Copy)]
enum Kind {
    Header,
    Nop,
    Ack,
    Terminate,
    Tick { cycles: u8, page: u8 },
}

#[derive(Debug, Default, Serialize)]
struct StreamSummary {
    bytes: u64,
    blocks: u64,
    mode_tag: Option<u8>,
    ticks: u64,
    nops: u64,
    acks: u64,
    terminated: bool,
    /// Seconds of audio at the tick sample rate.
    duration_seconds: f64,
    min_sample: i8,
    max_sample: i8,
    framing_errors: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reset SIGPIPE to default so piped output (e.g. head/tail) exits cleanly
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    let input = args.input.as_deref().expect("input argument required");
    let syms = symbols::parse_file(Path::new(&args.symbol_table))?;
    let kinds = kinds_by_address(&syms)?;

    let bytes = std::fs::read(input)?;
    let summary = walk_stream(&bytes, &kinds)?;

    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    println!("Stream:    {}", input);
    println!("Size:      {} bytes ({} blocks)", summary.bytes, summary.blocks);
    match summary.mode_tag {
        Some(0) => println!("Mode:      HGR"),
        Some(1) => println!("Mode:      DHGR"),
        Some(tag) => println!("Mode:      unknown (tag {})", tag),
        None => println!("Mode:      missing header!"),
    }
    println!("Ticks:     {}", summary.ticks);
    println!("NOPs:      {}", summary.nops);
    println!("ACKs:      {}", summary.acks);
    println!("Duration:  {:.2}s @ {} Hz", summary.duration_seconds, SAMPLE_RATE);
    println!(
        "Samples:   {} .. {}",
        summary.min_sample, summary.max_sample
    );
    println!("Terminated: {}", if summary.terminated { "yes" } else { "NO" });

    if summary.framing_errors.is_empty() {
        println!("Framing:   ok");
    } else {
        println!("Framing:   {} error(s)", summary.framing_errors.len());
        for err in &summary.framing_errors {
            println!("\t{}", err);
        }
        std::process::exit(2);
    }

    Ok(())
}

/// Invert the symbol table into an address -> opcode-kind map.
fn kinds_by_address(
    syms: &HashMap<String, u16>,
) -> Result<HashMap<u16, Kind>, Box<dyn std::error::Error>> {
    let mut kinds = HashMap::new();
    for (name, &addr) in syms {
        let kind = match name.as_str() {
            "op_header" => Kind::Header,
            "op_nop" => Kind::Nop,
            "op_ack" => Kind::Ack,
            "op_terminate" => Kind::Terminate,
            _ => match name
                .strip_prefix("op_tick_")
                .and_then(|rest| rest.split_once("_page_"))
                .and_then(|(c, p)| Some((c.parse().ok()?, p.parse().ok()?)))
            {
                Some((cycles, page)) => Kind::Tick { cycles, page },
                None => continue,
            },
        };
        if kinds.insert(addr, kind).is_some() {
            return Err(format!("duplicate opcode address 0x{:04X}", addr).into());
        }
    }
    Ok(kinds)
}

fn walk_stream(
    bytes: &[u8],
    kinds: &HashMap<u16, Kind>,
) -> Result<StreamSummary, Box<dyn std::error::Error>> {
    let mut summary = StreamSummary {
        bytes: bytes.len() as u64,
        blocks: bytes.len() as u64 / BLOCK_SIZE,
        min_sample: i8::MAX,
        max_sample: i8::MIN,
        ..Default::default()
    };
    let mut ack_ends = Vec::new();

    let mut pos = 0usize;
    while !summary.terminated {
        if pos + 2 > bytes.len() {
            summary.framing_errors.push(format!(
                "stream ends mid-opcode at offset {} without TERMINATE",
                pos
            ));
            break;
        }
        let addr = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]);
        let kind = *kinds
            .get(&addr)
            .ok_or_else(|| format!("unknown opcode address 0x{:04X} at offset {}", addr, pos))?;

        let len = match kind {
            Kind::Header | Kind::Ack => 4,
            Kind::Nop | Kind::Terminate => 2,
            Kind::Tick { .. } => 7,
        };
        if pos % BLOCK_SIZE as usize + len > BLOCK_SIZE as usize {
            summary
                .framing_errors
                .push(format!("opcode at offset {} straddles a block boundary", pos));
        }

        match kind {
            Kind::Header => summary.mode_tag = Some(bytes[pos + 2]),
            Kind::Nop => summary.nops += 1,
            Kind::Ack => {
                summary.acks += 1;
                ack_ends.push(pos + 4);
            }
            Kind::Terminate => summary.terminated = true,
            Kind::Tick { cycles, .. } => {
                summary.ticks += 1;
                let sample = a2v::audio::sample_for_cycles(cycles);
                summary.min_sample = summary.min_sample.min(sample);
                summary.max_sample = summary.max_sample.max(sample);
            }
        }
        pos += len;
    }

    // Every full block before the terminator must end on an ACK; the final
    // block ends in zero padding after TERMINATE instead.
    let mut boundary = BLOCK_SIZE as usize;
    while boundary < pos {
        if !ack_ends.contains(&boundary) {
            summary
                .framing_errors
                .push(format!("block ending at {} does not end on an ACK", boundary));
        }
        boundary += BLOCK_SIZE as usize;
    }

    if bytes.len() % BLOCK_SIZE as usize != 0 {
        summary
            .framing_errors
            .push("stream length is not a multiple of the block size".into());
    }
    if !bytes[pos..].iter().all(|&b| b == 0) {
        summary
            .framing_errors
            .push("nonzero bytes after TERMINATE".into());
    }

    if summary.ticks == 0 {
        summary.min_sample = 0;
        summary.max_sample = 0;
    }
    summary.duration_seconds = summary.ticks as f64 / f64::from(SAMPLE_RATE);
    Ok(summary)
}

fn print_version() {
    println!("a2v Info Tool");
    println!();

    let release = env!("RELEASE_VERSION");
    let commit = env!("GIT_COMMIT");
    if !release.is_empty() {
        println!("\tVersion:     {}", release);
    } else {
        println!("\tGit commit:  {}", commit);
    }
}
