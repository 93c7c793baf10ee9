use std::{
    io::{self, Write},
    path::PathBuf,
};

use dfu::{
    DeviceFilter, DfuFile, DownloadOptions, DownloadSession, ProgressFn,
};

use crate::CliError;

pub(crate) fn write_file(
    path: &PathBuf,
    filter: DeviceFilter,
    options: DownloadOptions,
) -> Result<(), CliError> {
    let file = DfuFile::load(path)?;
    if !file.has_suffix() {
        println!("Warning: File has no DFU suffix");
    }

    let mut progress = ProgressFn(print_progress);
    if DownloadSession::new(filter, options).download(&file, &mut progress) {
        Ok(())
    } else {
        Err(CliError::DownloadFailed)
    }
}

fn print_progress(fraction: f32, desc: &str) {
    let filled = (60.0 * fraction) as usize;
    print!(
        "\r  {:<12} {:3}% [{}]",
        desc,
        (100.0 * fraction) as u32,
        "#".repeat(filled) + &" ".repeat(60 - filled)
    );
    if fraction >= 1.0 {
        println!();
    }
    let _ = io::stdout().flush();
}
