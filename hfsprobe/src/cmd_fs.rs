use std::error::Error;
use std::io::{self, Write};
use std::process;

use hfsplus::{hfs_time_to_unix, DirEntry, EntryKind, Volume};

use crate::probe::open_volume;
use crate::style::*;

pub(crate) fn ls(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        eprintln!("Usage: hfsprobe ls <image> [path]");
        process::exit(1);
    }
    let path = args.get(1).map(String::as_str).unwrap_or("/");

    let vol = open_volume(&args[0])?;
    let mut entries = vol.list_directory(path)?;
    sort_entries(&mut entries);

    header(&format!("{}:{path}", args[0]));
    println!();
    println!("  {DIM}{:<5} {:>12}  {}{RESET}", "Kind", "Size", "Name");
    for entry in &entries {
        let color = kind_color(entry.kind);
        let size = if entry.kind == EntryKind::Directory {
            String::new()
        } else {
            format_size(entry.size)
        };
        println!(
            "  {DIM}{:<5}{RESET} {:>12}  {color}{}{RESET}",
            kind_icon(entry.kind),
            size,
            entry.name
        );
    }
    println!();
    println!("  {DIM}{} entries{RESET}", entries.len());
    Ok(())
}

pub(crate) fn tree(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        eprintln!("Usage: hfsprobe tree <image> [path]");
        process::exit(1);
    }
    let path = args.get(1).map(String::as_str).unwrap_or("/");

    let vol = open_volume(&args[0])?;
    header(&format!("{}:{path}", args[0]));
    println!();
    println!("  {BLUE}{path}{RESET}");
    print_subtree(&vol, path, "  ")?;
    Ok(())
}

fn print_subtree<R: io::Read + io::Seek>(
    vol: &Volume<R>,
    path: &str,
    prefix: &str,
) -> Result<(), Box<dyn Error>> {
    let mut entries = vol.list_directory(path)?;
    sort_entries(&mut entries);

    let last = entries.len().saturating_sub(1);
    for (i, entry) in entries.iter().enumerate() {
        let branch = if i == last { ELBOW } else { TEE };
        let color = kind_color(entry.kind);
        println!("{prefix}{DIM}{branch}{RESET} {color}{}{RESET}", entry.name);

        if entry.kind == EntryKind::Directory {
            let child_path = format!("{}/{}", path.trim_end_matches('/'), entry.name);
            let child_prefix = if i == last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}{DIM}{PIPE}{RESET}   ")
            };
            print_subtree(vol, &child_path, &child_prefix)?;
        }
    }
    Ok(())
}

pub(crate) fn cat(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.len() < 2 {
        eprintln!("Usage: hfsprobe cat <image> <path>");
        process::exit(1);
    }

    let vol = open_volume(&args[0])?;
    let mut reader = vol.open_file(&args[1])?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut reader, &mut out)?;
    out.flush()?;
    Ok(())
}

pub(crate) fn stat(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.len() < 2 {
        eprintln!("Usage: hfsprobe stat <image> <path>");
        process::exit(1);
    }
    let path = &args[1];

    let vol = open_volume(&args[0])?;
    let stat = vol.stat(path)?;

    header(path);
    section("Metadata");
    kv("CNID", &stat.cnid.to_string());
    kv(
        "Kind",
        match stat.kind {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
            EntryKind::Symlink => "symlink",
        },
    );
    kv("Size", &format!("{} ({})", format_commas(stat.size), format_size(stat.size)));
    kv("Mode", &mode_string(stat.permissions.mode));
    kv(
        "Owner",
        &format!("{}:{}", stat.permissions.owner_id, stat.permissions.group_id),
    );
    kv("Created", &format!("{} (unix)", hfs_time_to_unix(stat.create_date)));
    kv("Modified", &format!("{} (unix)", hfs_time_to_unix(stat.modify_date)));
    kv("Data fork extents", &stat.data_fork_extents.to_string());
    kv("Resource fork", &format_size(stat.resource_fork_size));
    println!();
    Ok(())
}

pub(crate) fn attrs(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.len() < 2 {
        eprintln!("Usage: hfsprobe attrs <image> <path>");
        process::exit(1);
    }
    let path = &args[1];

    let vol = open_volume(&args[0])?;
    let names = vol.list_attributes(path)?;

    header(path);
    section("Extended Attributes");
    if names.is_empty() {
        println!("  {DIM}none{RESET}");
    }
    for name in &names {
        println!("  {GREEN}{name}{RESET}");
    }
    println!();
    Ok(())
}

fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| {
        let a_dir = a.kind == EntryKind::Directory;
        let b_dir = b.kind == EntryKind::Directory;
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });
}
