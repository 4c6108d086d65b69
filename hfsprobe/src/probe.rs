//! Image opening: partition detection and volume selection.

use std::error::Error;
use std::fs::File;

use log::{debug, info};

use hfsplus::{Source, Volume, VolumeKind};
use partmap::{Partition, PartitionHint, Scheme};

/// Detect the partition scheme of an image file, if any.
pub(crate) fn scan_partitions(
    path: &str,
) -> Result<(File, Option<(Scheme, Vec<Partition>)>), Box<dyn Error>> {
    let mut file = File::open(path)?;
    let detected = partmap::detect(&mut file)?;
    Ok((file, detected))
}

/// Open the HFS+ volume in an image: the first HFS-hinted partition, else
/// the first partition that detects as HFS-family, else the whole image.
pub(crate) fn open_volume(path: &str) -> Result<Volume<File>, Box<dyn Error>> {
    let (file, detected) = scan_partitions(path)?;
    let source = Source::new(file);

    let Some((scheme, partitions)) = detected else {
        debug!("no partition table; attaching the whole image");
        return Ok(Volume::attach(source)?);
    };
    info!("{}: {} partitions", scheme.name(), partitions.len());

    if let Some(p) = partitions.iter().find(|p| p.hint == PartitionHint::Hfs) {
        info!("attaching partition {} ({})", p.index, p.name);
        return Ok(Volume::attach(source.sub_source(p.index, p.offset, p.length))?);
    }

    // No HFS type tag; sniff the remaining candidates.
    for p in &partitions {
        if p.hint == PartitionHint::Ignore {
            continue;
        }
        let candidate = source.sub_source(p.index, p.offset, p.length);
        if matches!(
            hfsplus::detect(&candidate)?,
            VolumeKind::HfsPlus | VolumeKind::Hfsx | VolumeKind::WrappedHfsPlus
        ) {
            info!("attaching partition {} ({}) by sniffing", p.index, p.name);
            return Ok(Volume::attach(candidate)?);
        }
    }

    Err("no HFS+ volume found in any partition".into())
}
