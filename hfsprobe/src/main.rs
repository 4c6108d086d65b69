//! hfsprobe — inspect HFS+/HFSX volumes in disk images and devices
//!
//! # Usage
//!
//! ```text
//! hfsprobe parts <image>              Partition table (GPT/MBR/APM/CS)
//! hfsprobe info  <image>              Volume header and special files
//! hfsprobe ls    <image> [path]       List directory contents
//! hfsprobe tree  <image> [path]       Browse the filesystem tree
//! hfsprobe cat   <image> <path>       Extract a file to stdout
//! hfsprobe stat  <image> <path>       File metadata
//! hfsprobe attrs <image> <path>       Extended attribute names
//! ```
//!
//! The image may be a bare volume, a wrapped HFS+ volume, or a
//! partitioned disk; the HFS+ partition is located automatically.

mod cmd_fs;
mod cmd_info;
mod cmd_parts;
mod probe;
mod style;

use std::env;
use std::process;

use style::{BOLD, DIM, GREEN, RED, RESET};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "parts" => cmd_parts::run(&args[2..]),
        "info" => cmd_info::run(&args[2..]),
        "ls" => cmd_fs::ls(&args[2..]),
        "tree" => cmd_fs::tree(&args[2..]),
        "cat" => cmd_fs::cat(&args[2..]),
        "stat" => cmd_fs::stat(&args[2..]),
        "attrs" => cmd_fs::attrs(&args[2..]),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("{RED}Unknown command: {}{RESET}", args[1]);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("{RED}error:{RESET} {e}");
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!(
        r#"
{BOLD}hfsprobe{RESET} — HFS+/HFSX volume inspector

{DIM}Partition schemes: GPT, MBR, Apple Partition Map, Core Storage{RESET}

{BOLD}USAGE:{RESET}
    hfsprobe <COMMAND> <image> [ARGS]

{BOLD}COMMANDS:{RESET}
    {GREEN}parts{RESET}   <image>           Partition table
    {GREEN}info{RESET}    <image>           Volume header and special files
    {GREEN}ls{RESET}      <image> [path]    List directory contents
    {GREEN}tree{RESET}    <image> [path]    Browse the filesystem tree
    {GREEN}cat{RESET}     <image> <path>    Extract a file to stdout
    {GREEN}stat{RESET}    <image> <path>    File metadata
    {GREEN}attrs{RESET}   <image> <path>    Extended attribute names

{BOLD}EXAMPLES:{RESET}
    hfsprobe parts macos9.img
    hfsprobe info macos9.img
    hfsprobe tree macos9.img /System
    hfsprobe cat macos9.img /ReadMe.txt > ReadMe.txt
"#
    );
}
