use std::path::PathBuf;

use anyhow::{Context, Result};
use calibra_core::consts::{KEY_DATE_OBS, KEY_EXPTIME};
use calibra_core::header::is_commentary;
use calibra_core::io::fits::FitsReader;
use clap::Args;

#[derive(Args)]
pub struct InfoArgs {
    /// Input FITS file
    pub file: PathBuf,

    /// Also print every header card
    #[arg(long)]
    pub header: bool,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let reader = FitsReader::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    println!("File:        {}", args.file.display());
    println!("HDUs:        {}", reader.hdu_count());

    for hdu in &reader.hdus {
        println!();
        match hdu.name {
            Some(ref name) => println!("HDU {}:       {} ({})", hdu.index, hdu.kind, name),
            None => println!("HDU {}:       {}", hdu.index, hdu.kind),
        }
        match hdu.image_shape()? {
            Some((rows, cols)) => println!("Dimensions:  {}x{}", cols, rows),
            None => println!("Dimensions:  no image data"),
        }
        if let Some(bitpix) = hdu.bitpix {
            println!("Bitpix:      {}", bitpix);
        }
        if let Some(exptime) = hdu.header.get_f64(KEY_EXPTIME) {
            println!("Exposure:    {} s", exptime);
        }
        if let Some(date) = hdu.header.get_str(KEY_DATE_OBS) {
            println!("Date:        {}", date);
        }
        let history = hdu.header.history();
        if !history.is_empty() {
            println!("History:");
            for entry in history {
                println!("  {}", entry);
            }
        }

        if args.header {
            println!("Header:");
            for card in hdu.header.cards() {
                if is_commentary(&card.keyword) {
                    println!("  {:<8}   {}", card.keyword, card.value);
                    continue;
                }
                match card.comment {
                    Some(ref comment) => {
                        println!("  {:<8} = {} / {}", card.keyword, card.value, comment)
                    }
                    None => println!("  {:<8} = {}", card.keyword, card.value),
                }
            }
        }
    }

    Ok(())
}
