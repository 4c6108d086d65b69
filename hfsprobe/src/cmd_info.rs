use std::error::Error;
use std::process;

use hfsplus::hfs_time_to_unix;

use crate::probe::open_volume;
use crate::style::*;

pub(crate) fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        eprintln!("Usage: hfsprobe info <image>");
        process::exit(1);
    }
    let path = &args[0];

    let vol = open_volume(path)?;
    let vh = vol.header();

    header(&format!("HFS+ Volume: {path}"));

    section("Volume Header");
    let signature = if vh.is_hfsx() {
        format!("HFSX {DIM}(case-sensitive){RESET}")
    } else {
        format!("HFS+ {DIM}(case-insensitive){RESET}")
    };
    kv("Signature", &signature);
    kv("Version", &vh.version.to_string());
    kv("Block size", &format!("{} bytes", vh.block_size));
    kv("Total blocks", &format_commas(vh.total_blocks as u64));
    kv("Free blocks", &format_commas(vh.free_blocks as u64));
    kv("Volume size", &format_size(vol.length()));
    kv_highlight("Files", &format_commas(vh.file_count as u64));
    kv_highlight("Folders", &format_commas(vh.folder_count as u64));
    kv("Created", &format!("{} (unix)", hfs_time_to_unix(vh.create_date)));
    kv("Modified", &format!("{} (unix)", hfs_time_to_unix(vh.modify_date)));
    kv("Next CNID", &vh.next_catalog_id.to_string());
    kv("Write count", &vh.write_count.to_string());

    section("Special Files");
    kv("Catalog", &format_size(vh.catalog_file.logical_size));
    kv("Extents overflow", &format_size(vh.extents_file.logical_size));
    kv("Allocation", &format_size(vh.allocation_file.logical_size));
    kv("Attributes", &format_size(vh.attributes_file.logical_size));
    kv("Startup", &format_size(vh.startup_file.logical_size));

    match vol.journal_info()? {
        Some(journal) => {
            section("Journal");
            kv("Offset", &journal.offset.to_string());
            kv("Size", &format_size(journal.size));
        }
        None => {
            println!();
            println!("  {DIM}not journaled{RESET}");
        }
    }
    println!();
    Ok(())
}
