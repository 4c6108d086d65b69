use std::error::Error;
use std::process;

use crate::probe::scan_partitions;
use crate::style::*;

pub(crate) fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    if args.is_empty() {
        eprintln!("Usage: hfsprobe parts <image>");
        process::exit(1);
    }
    let path = &args[0];

    let (_, detected) = scan_partitions(path)?;
    header(&format!("Partitions: {path}"));

    let Some((scheme, partitions)) = detected else {
        println!();
        println!("  {DIM}no partition table; treat the image as one volume{RESET}");
        return Ok(());
    };

    section(scheme.name());
    println!(
        "  {DIM}{:<4} {:>14} {:>12}  {:<14} {}{RESET}",
        "#", "Offset", "Size", "Hint", "Name"
    );
    for p in &partitions {
        println!(
            "  {:<4} {:>14} {:>12}  {:<14} {GREEN}{}{RESET}",
            p.index,
            p.offset,
            format_size(p.length),
            format!("{:?}", p.hint),
            p.name,
        );
    }
    println!();
    Ok(())
}
