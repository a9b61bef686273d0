//! RustSVF demonstration driver
//!
//! Usage: rustsvf [READS] [READ_LENGTH] [GREEDY_LENGTH]
//!
//! Simulates a client that reads ranges of a synthetic 64 KiB remote file
//! through a sparse virtual file. Each simulated read first asks the cache
//! which ranges are missing, "fetches" only those from the synthetic file,
//! writes them back and then reads from the cache. The driver prints the
//! resulting block layout and cache statistics, then demonstrates LRU
//! punting.

use std::env;
use std::process::ExitCode;

use rustsvf::{FilePos, SparseVirtualFile, VERSION};

/// Length of the synthetic remote file.
const FILE_LENGTH: u64 = 64 * 1024;

/// Byte at an absolute position of the synthetic remote file.
fn remote_byte(fpos: FilePos) -> u8 {
    ((fpos * 31 + 7) % 251) as u8
}

fn remote_fetch(fpos: FilePos, len: usize) -> Vec<u8> {
    (fpos..fpos + len as u64).map(remote_byte).collect()
}

fn parse_arg(args: &[String], index: usize, default: usize) -> Result<usize, String> {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("invalid argument \"{}\"", raw)),
        None => Ok(default),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let (reads, read_length, greedy_length) = match (
        parse_arg(&args, 1, 64),
        parse_arg(&args, 2, 256),
        parse_arg(&args, 3, 1024),
    ) {
        (Ok(a), Ok(b), Ok(c)) => (a, b, c),
        _ => {
            eprintln!("usage: rustsvf [READS] [READ_LENGTH] [GREEDY_LENGTH]");
            return ExitCode::FAILURE;
        }
    };
    if read_length == 0 || read_length as u64 >= FILE_LENGTH {
        eprintln!("READ_LENGTH must be between 1 and {}", FILE_LENGTH - 1);
        return ExitCode::FAILURE;
    }

    println!("rustsvf {} demonstration", VERSION);
    println!(
        "simulating {} reads of {} bytes (greedy length {}) against a {} byte remote file\n",
        reads, read_length, greedy_length, FILE_LENGTH
    );

    let mut svf = SparseVirtualFile::new("demo-remote.bin", 0.0);
    let mut fetches = 0usize;
    let mut fetched_bytes = 0u64;

    // Simple LCG so runs are repeatable.
    let mut seed: u64 = 0x2545F491;
    for _ in 0..reads {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let fpos = (seed >> 16) % (FILE_LENGTH - read_length as u64);

        if !svf.has(fpos, read_length) {
            for (need_fpos, need_len) in svf.need_greedy(fpos, read_length, greedy_length) {
                // The cache does not know the file length; clamp here.
                let clamped = need_len.min((FILE_LENGTH - need_fpos) as usize);
                if let Err(err) = svf.write(need_fpos, &remote_fetch(need_fpos, clamped)) {
                    eprintln!("write failed: {}", err);
                    return ExitCode::FAILURE;
                }
                fetches += 1;
                fetched_bytes += clamped as u64;
            }
        }
        match svf.read(fpos, read_length) {
            Ok(data) => {
                if data != remote_fetch(fpos, read_length) {
                    eprintln!("read at {} returned unexpected data", fpos);
                    return ExitCode::FAILURE;
                }
            }
            Err(err) => {
                eprintln!("read failed: {}", err);
                return ExitCode::FAILURE;
            }
        }
    }

    println!("cache state after the simulation:");
    println!("  blocks:          {}", svf.num_blocks());
    println!("  resident bytes:  {}", svf.num_bytes());
    println!("  size of:         {}", svf.size_of());
    println!("  last position:   {}", svf.last_file_position());
    println!("  writes:          {} ({} bytes)", svf.count_write(), svf.bytes_write());
    println!("  reads:           {} ({} bytes)", svf.count_read(), svf.bytes_read());
    println!("  remote fetches:  {} ({} bytes)", fetches, fetched_bytes);

    let layout = svf.blocks();
    println!("\nfirst blocks of the layout:");
    for (fpos, len) in layout.iter().take(8) {
        println!("  [{:>6}, {:>6})  {} bytes", fpos, fpos + *len as u64, len);
    }
    if layout.len() > 8 {
        println!("  ... {} more", layout.len() - 8);
    }

    let budget = svf.num_bytes() / 2;
    let removed = svf.lru_punt(budget);
    println!(
        "\nlru_punt to {} bytes removed {} bytes, {} block(s) remain",
        budget,
        removed,
        svf.num_blocks()
    );

    ExitCode::SUCCESS
}
