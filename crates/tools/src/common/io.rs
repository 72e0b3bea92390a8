//! 入出力ユーティリティ（gzip 対応）

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// レコード入力を開く。`-` は標準入力、拡張子 `.gz` は gzip として展開する
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if p.as_os_str() == "-" {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::MultiGzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// レポートの出力先。未指定または `-` なら標準出力
pub fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write>> {
    match path {
        Some(p) if p.as_os_str() != "-" => Ok(Box::new(BufWriter::new(File::create(p)?))),
        _ => Ok(Box::new(io::stdout())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Read;

    #[test]
    fn reads_plain_and_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("a.jsonl");
        std::fs::write(&plain, "line\n").unwrap();

        let gz = dir.path().join("a.jsonl.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"line\n").unwrap();
        enc.finish().unwrap();

        for path in [plain, gz] {
            let mut s = String::new();
            open_reader(&path).unwrap().read_to_string(&mut s).unwrap();
            assert_eq!(s, "line\n");
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(open_reader("/nonexistent/records.jsonl").is_err());
    }
}
