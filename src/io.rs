/// Reader/writer helpers shared by every stage.
use anyhow::{Context, Result};
use bzip2_rs::DecoderReader;
use flate2::read::MultiGzDecoder;
use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Open a text file, decompressing `.gz`/`.bgz` (gzip or BGZF) and `.bz2` inputs.
pub fn open_reader(path: &str) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("opening '{}'", path))?;
    let reader: Box<dyn BufRead + Send> = if path.ends_with(".gz") || path.ends_with(".bgz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else if path.ends_with(".bz2") {
        Box::new(BufReader::new(DecoderReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// An output file, BGZF-compressed when its path ends in `.gz` so the result
/// can be handed straight to tabix.
///
/// Call [`OutputWriter::finish`] once everything is written: it flushes and,
/// for BGZF output, writes the EOF block and reports any error doing so.
pub enum OutputWriter {
    Plain(BufWriter<File>),
    Bgzf(BufWriter<bgzf::Writer<File>>),
}

impl OutputWriter {
    pub fn finish(self) -> std::io::Result<()> {
        match self {
            Self::Plain(mut w) => w.flush(),
            Self::Bgzf(w) => {
                let inner = w.into_inner().map_err(|e| e.into_error())?;
                inner.finish()?;
                Ok(())
            }
        }
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Bgzf(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Bgzf(w) => w.flush(),
        }
    }
}

/// Create an output file, making parent directories as needed.
pub fn open_writer(path: &str) -> Result<OutputWriter> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating '{}'", path))?;
    if path.ends_with(".gz") {
        Ok(OutputWriter::Bgzf(BufWriter::new(bgzf::Writer::new(file))))
    } else {
        Ok(OutputWriter::Plain(BufWriter::new(file)))
    }
}

/// Leading token of a file name, up to the first `.`
/// (`Adipose_Subcutaneous.v8.signif_variant_gene_pairs.txt.gz` → `Adipose_Subcutaneous`).
pub fn file_token(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path);
    name.split('.').next().unwrap_or(name).to_string()
}

/// File stem without any compression or format suffixes, used as a provenance label.
pub fn file_label(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path);
    let mut label = name;
    for suffix in [".gz", ".bgz", ".bz2", ".gtf", ".gff3", ".gff", ".txt", ".tsv"] {
        label = label.strip_suffix(suffix).unwrap_or(label);
    }
    label.to_string()
}

/// Drop an Ensembl version suffix (`ENSG00000223972.5` → `ENSG00000223972`).
/// PAR_Y identifiers keep their suffix so X and Y copies stay distinct.
pub fn strip_version(id: &str) -> &str {
    if id.ends_with("_PAR_Y") {
        return id;
    }
    match id.rsplit_once('.') {
        Some((base, v)) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => base,
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_file_token() {
        assert_eq!(
            file_token("/data/gtex/Adipose_Subcutaneous.v8.signif_variant_gene_pairs.txt.gz"),
            "Adipose_Subcutaneous"
        );
        assert_eq!(file_token("Liver"), "Liver");
    }

    #[test]
    fn test_file_label() {
        assert_eq!(file_label("/x/gencode.v44.annotation.gtf.gz"), "gencode.v44.annotation");
        assert_eq!(file_label("appris_data.principal.txt"), "appris_data.principal");
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("ENSG00000223972.5"), "ENSG00000223972");
        assert_eq!(strip_version("ENST00000456328"), "ENST00000456328");
        assert_eq!(strip_version("ENSG00000182378.14_PAR_Y"), "ENSG00000182378.14_PAR_Y");
        assert_eq!(strip_version("odd.name"), "odd.name");
    }

    #[test]
    fn test_bgzf_writer_roundtrip_through_gzip_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv.gz");
        let path = path.to_str().unwrap();
        let mut w = open_writer(path).unwrap();
        assert!(matches!(w, OutputWriter::Bgzf(_)));
        writeln!(w, "chr1\t10\t20").unwrap();
        w.finish().unwrap();

        let mut s = String::new();
        open_reader(path).unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "chr1\t10\t20\n");
    }

    #[test]
    fn test_finished_bgzf_output_ends_with_eof_block() {
        const BGZF_EOF: [u8; 28] = [
            0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43,
            0x02, 0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.tsv.gz");
        let path = path.to_str().unwrap();
        let mut w = open_writer(path).unwrap();
        for i in 0..1000 {
            writeln!(w, "chr1\t{}\t{}", i, i + 1).unwrap();
        }
        w.finish().unwrap();

        let bytes = std::fs::read(path).unwrap();
        assert!(bytes.len() > BGZF_EOF.len());
        assert_eq!(&bytes[bytes.len() - BGZF_EOF.len()..], &BGZF_EOF);
        let lines = open_reader(path).unwrap().lines().count();
        assert_eq!(lines, 1000);
    }

    #[test]
    fn test_plain_writer_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.tsv");
        let path = path.to_str().unwrap();
        let mut w = open_writer(path).unwrap();
        writeln!(w, "x").unwrap();
        w.finish().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "x\n");
    }
}
