use std::fs;
use std::io::Read;
use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::spectrum::Spectrum;
use crate::{Error, Result};

/// Layout of a two-column spectrum file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Every line other than `#` comments holds a wavelength and an intensity
    #[default]
    Raw,
    /// Instrument output, where lines that are not a pair of numbers are skipped
    Metadata,
}

/// Read a spectrum from the file at `path`
///
/// # Errors
/// Returns an error if the file cannot be read or, for [`Format::Raw`], if a line is not a pair
/// of numbers.
pub fn read_spectrum(path: &Path, format: Format) -> Result<Spectrum> {
    let file = fs::read(path)?;
    parse_spectrum(&file[..], format)
}

/// Parse two columns separated by commas, tabs or runs of spaces
///
/// # Errors
/// Returns [`Error::Parse`] for a malformed line in [`Format::Raw`] and
/// [`Error::EmptySpectrum`] if no samples were found.
pub fn parse_spectrum(mut reader: impl Read, format: Format) -> Result<Spectrum> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .delimiter(sniff_delimiter(&text))
        .from_reader(text.as_bytes());

    let mut x = vec![];
    let mut y = vec![];
    for result in rdr.records() {
        let record = result?;
        let fields = record.iter().filter(|field| !field.is_empty()).collect::<Vec<_>>();
        if fields.is_empty() {
            continue;
        }
        match (
            fields.first().and_then(|f| f.parse::<f64>().ok()),
            fields.get(1).and_then(|f| f.parse::<f64>().ok()),
        ) {
            (Some(wavelength), Some(intensity)) => {
                x.push(wavelength);
                y.push(intensity);
            }
            _ => match format {
                Format::Metadata => continue,
                Format::Raw => {
                    return Err(Error::Parse {
                        line: record.position().map_or(0, csv::Position::line),
                        content: fields.iter().join(" "),
                    })
                }
            },
        }
    }
    log::debug!("read {} samples", x.len());
    Spectrum::load(x, y)
}

/// Comma if the text contains one, otherwise tab, otherwise space
fn sniff_delimiter(text: &str) -> u8 {
    let data = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<String>();
    if data.contains(',') {
        b','
    } else if data.contains('\t') {
        b'\t'
    } else {
        b' '
    }
}
