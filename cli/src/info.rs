use std::path::PathBuf;

use dfu::{DFUSE_VERSION_NUMBER, DfuFile, DfuseImage};

use crate::CliError;

/// Print the framing of a firmware file and, for DfuSe files, the
/// contained targets and elements.
pub(crate) fn show_file(path: &PathBuf) -> Result<(), CliError> {
    let file = DfuFile::load(path)?;
    print!("{}", file.describe());
    if !file.has_suffix() {
        println!("The file does not contain a DFU suffix");
    }

    if file.bcd_dfu == DFUSE_VERSION_NUMBER {
        let image = DfuseImage::parse(file.payload())?;
        println!("DfuSe image, {} target(s):", image.targets.len());
        for target in &image.targets {
            println!(
                "  Alt setting {} \"{}\", {} element(s):",
                target.alt_setting,
                target.name.as_deref().unwrap_or(""),
                target.elements.len()
            );
            for element in &target.elements {
                println!(
                    "    - 0x{:08x}: {:7} bytes",
                    element.address,
                    element.data.len()
                );
            }
        }
    } else {
        println!("Payload: {} bytes", file.payload().len());
    }
    Ok(())
}
